pub mod machine;
pub mod state;
pub mod view;
