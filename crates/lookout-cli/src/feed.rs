//! Stdin driver for `--local` mode.
//!
//! Each line is one command against the loopback channel:
//!
//! ```text
//! roster 1:Ada 2:Grace
//! join 3:Linus
//! leave 2
//! say Deploy finished
//! ack
//! fail transport socket closed
//! ```

use lookout_common::ChannelError;
use lookout_realtime::{LocalBroadcast, Member};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum FeedCommand {
    Roster(Vec<Member>),
    Join(Member),
    Leave(Member),
    Say(String),
    Ack,
    Fail(ChannelError),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid member {0:?}, expected ID or ID:NAME")]
    InvalidMember(String),

    #[error("{0} needs an argument")]
    MissingArgument(&'static str),

    #[error("unknown error kind {0:?}, expected transport or application")]
    UnknownErrorKind(String),
}

/// Parse `ID` or `ID:NAME`.
fn parse_member(token: &str) -> Result<Member, FeedError> {
    let (id, name) = token.split_once(':').unwrap_or((token, ""));
    let id = id
        .parse::<i64>()
        .map_err(|_| FeedError::InvalidMember(token.to_string()))?;
    Ok(Member::new(id, name))
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<FeedCommand>, FeedError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let cmd = match word {
        "roster" => FeedCommand::Roster(
            rest.split_whitespace()
                .map(parse_member)
                .collect::<Result<_, _>>()?,
        ),
        "join" if rest.is_empty() => return Err(FeedError::MissingArgument("join")),
        "join" => FeedCommand::Join(parse_member(rest)?),
        "leave" if rest.is_empty() => return Err(FeedError::MissingArgument("leave")),
        "leave" => FeedCommand::Leave(parse_member(rest)?),
        "say" if rest.is_empty() => return Err(FeedError::MissingArgument("say")),
        "say" => FeedCommand::Say(rest.to_string()),
        "ack" => FeedCommand::Ack,
        "fail" => {
            let (kind, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let message = message.trim();
            match kind {
                "transport" => FeedCommand::Fail(ChannelError::transport(message)),
                "application" => FeedCommand::Fail(ChannelError::application(message)),
                "" => return Err(FeedError::MissingArgument("fail")),
                other => return Err(FeedError::UnknownErrorKind(other.to_string())),
            }
        }
        other => return Err(FeedError::UnknownCommand(other.to_string())),
    };
    Ok(Some(cmd))
}

/// Where fed commands go.
#[derive(Debug, Clone)]
pub struct FeedTarget {
    pub channel: String,
    /// Broadcast event for `say`. Presence-only targets have none.
    pub event: Option<String>,
}

async fn apply(local: &LocalBroadcast, target: &FeedTarget, cmd: FeedCommand) -> bool {
    let channel = target.channel.as_str();
    match cmd {
        FeedCommand::Roster(members) => local.roster(channel, members).await,
        FeedCommand::Join(member) => local.joining(channel, member).await,
        FeedCommand::Leave(member) => local.leaving(channel, member).await,
        FeedCommand::Say(text) => match &target.event {
            Some(event) => local.publish(channel, event, &text).await,
            None => {
                warn!("`say` only applies to the notices command");
                false
            }
        },
        FeedCommand::Ack => {
            local.acknowledge(channel).await;
            true
        }
        FeedCommand::Fail(err) => {
            local.fail(channel, err).await;
            true
        }
    }
}

/// Read commands from stdin until EOF.
pub async fn run(local: LocalBroadcast, target: FeedTarget) {
    info!(channel = %target.channel, "Reading local channel commands from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some(cmd)) => {
                if !apply(&local, &target, cmd).await {
                    debug!(line = %line, "Nobody was listening");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring input line"),
        }
    }
    info!("Stdin closed");
}
