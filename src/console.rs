use std::str::FromStr;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::sos::machine::{AlertHandle, Intent};
use crate::sos::view;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Intent(Intent),
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" | "s" => Ok(Command::Intent(Intent::Start)),
            "confirm" | "y" => Ok(Command::Intent(Intent::Confirm)),
            "cancel" | "n" => Ok(Command::Intent(Intent::Cancel)),
            "quit" | "q" => Ok(Command::Quit),
            other => Err(anyhow!(
                "Unknown command '{}' (expected start, confirm, cancel or quit)",
                other
            )),
        }
    }
}

pub async fn run(handle: AlertHandle) -> anyhow::Result<()> {
    let mut state = handle.state();
    let renderer = tokio::spawn(async move {
        loop {
            let panel = view::render(&state.borrow_and_update());
            println!("\n{}", panel);
            if state.changed().await.is_err() {
                break;
            }
        }
    });

    let mut notices = handle.notices();
    let notifier = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => println!("! {}", notice),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} notices", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Intent(intent)) => handle.dispatch(intent),
                    Ok(Command::Quit) => break,
                    Err(e) => warn!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Closing SOS session");
    handle.shutdown().await;
    let _ = renderer.await;
    let _ = notifier.await;
    Ok(())
}
