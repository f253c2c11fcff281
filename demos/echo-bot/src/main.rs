//! A bot that logs into a chatroom and echoes every message back.

use std::time::Duration;

use clap::Parser;
use teahaz::prelude::*;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Logs into a Teahaz chatroom and answers every new message.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL, e.g. https://tea.example
    #[arg(short, long)]
    url: String,

    /// Chatroom to join
    #[arg(short, long)]
    chatroom: String,

    #[arg(long, default_value = "echo-bot")]
    username: String,

    #[arg(long)]
    password: String,

    /// Seconds between polls
    #[arg(long, default_value = "1", value_parser = parse_seconds)]
    interval: Duration,
}

fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

#[tokio::main]
async fn main() -> Result<(), TeahazError> {
    teahaz::logging::init();
    let args = Args::parse();

    let config = ChatroomConfig {
        poll: PollConfig::with_interval(args.interval),
        ..Default::default()
    };
    let teacup = Teacup::builder(std::sync::Arc::new(ReqwestSession::new()?))
        .config(config)
        .build();

    teacup.subscribe_all(EventKind::Error, |event| {
        if let Event::Error(failure) = event {
            warn!(%failure, "request rejected");
        }
    });
    teacup.subscribe_all(EventKind::NetworkException, |event| {
        if let Event::NetworkException(failure) = event {
            warn!(error = %failure.error, url = %failure.request.url, "server unreachable");
        }
    });

    let chatroom_id = ChatroomId::from(args.chatroom.as_str());
    let Some(room) = teacup
        .login(&args.url, &chatroom_id, &args.username, &args.password)
        .await?
    else {
        error!("login failed, see above");
        return Ok(());
    };

    // Callbacks run on the poll task; replies are sent from here.
    let (tx, mut rx) = mpsc::unbounded_channel::<(MessageId, String)>();
    let me = args.username.clone();
    room.subscribe(EventKind::NewMessage, move |event| {
        let Some(message) = event.message() else { return };
        if message.username.as_deref() == Some(me.as_str()) {
            return;
        }
        if let Some(text) = message.text() {
            let _ = tx.send((message.id.clone(), text.to_string()));
        }
    });
    info!(chatroom = %chatroom_id, "echo bot running, ctrl-c to quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some((id, text)) = rx.recv() => {
                if let Err(e) = room.send(&format!("echo: {text}"), Some(&id)).await {
                    warn!(error = %e, "reply failed");
                }
            }
        }
    }

    teacup.stop();
    info!("echo bot stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds_accepts_fractions() {
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
    }

    #[test]
    fn test_parse_seconds_rejects_unrepresentable_values() {
        assert!(parse_seconds("inf").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_args_reject_infinite_interval() {
        let parsed = Args::try_parse_from([
            "echo-bot", "--url", "http://h", "--chatroom", "r", "--password", "pw",
            "--interval", "inf",
        ]);
        assert!(parsed.is_err());
    }
}
