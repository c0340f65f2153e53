//! Command parsing and dispatch. A received line is shell-word-split into a
//! verb and positional arguments, mapped onto the closed [`Command`] set and
//! executed against the shared pager state. Anything that goes wrong comes
//! back as a [`CommandError`] so the handler can answer with the failure
//! sentinel instead of leaking a partial response.

use tracing::{debug, info};

use crate::pager::Pager;
use crate::speech::Speaker;
use crate::workers::WorkerRegistry;

/// Response for commands that succeed without output of their own.
pub const SUCCESS: &str = "SUCCESS";

/// The full set of commands a client can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enable,
    Disable,
    Status,
    /// Heartbeat: resets the watchdog timer.
    Watchdog,
    Page { message: String },
    /// Record a message in the daemon log without triggering a page.
    Log { message: String },
    Exit,
}

#[derive(Debug)]
pub enum CommandError {
    Empty,
    UnbalancedQuote,
    UnknownVerb(String),
    WrongArity {
        verb: &'static str,
        max: usize,
        got: usize,
    },
    /// `exit` only terminates the server when sent as the bare command; the
    /// dispatcher refuses to handle it.
    ExitOverDispatch,
    ActionFailed(anyhow::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty command"),
            CommandError::UnbalancedQuote => write!(f, "unbalanced quote in command"),
            CommandError::UnknownVerb(verb) => write!(f, "unknown command '{verb}'"),
            CommandError::WrongArity { verb, max, got } => {
                write!(f, "'{verb}' takes at most {max} argument(s), got {got}")
            }
            CommandError::ExitOverDispatch => {
                write!(f, "exit must be sent as the bare command 'exit'")
            }
            CommandError::ActionFailed(err) => write!(f, "action failed: {err:#}"),
        }
    }
}

impl Command {
    /// Parse one received line. The first shell token is the verb
    /// (case-insensitive), the rest are positional arguments.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let tokens = tokenize(raw)?;
        let Some((verb, args)) = tokens.split_first() else {
            return Err(CommandError::Empty);
        };
        match verb.to_ascii_lowercase().as_str() {
            "enable" => no_args("enable", args).map(|()| Command::Enable),
            "disable" => no_args("disable", args).map(|()| Command::Disable),
            "status" => no_args("status", args).map(|()| Command::Status),
            "watchdog" => no_args("watchdog", args).map(|()| Command::Watchdog),
            "page" => optional_message("page", args).map(|message| Command::Page { message }),
            "log" => optional_message("log", args).map(|message| Command::Log { message }),
            "exit" => no_args("exit", args).map(|()| Command::Exit),
            _ => Err(CommandError::UnknownVerb(verb.clone())),
        }
    }
}

fn no_args(verb: &'static str, args: &[String]) -> Result<(), CommandError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandError::WrongArity {
            verb,
            max: 0,
            got: args.len(),
        })
    }
}

fn optional_message(verb: &'static str, args: &[String]) -> Result<String, CommandError> {
    match args {
        [] => Ok(String::new()),
        [message] => Ok(message.clone()),
        _ => Err(CommandError::WrongArity {
            verb,
            max: 1,
            got: args.len(),
        }),
    }
}

/// Shell-style word splitting: whitespace separates tokens, single and
/// double quotes group words, backslash escapes the next character.
fn tokenize(raw: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' && q == '"' {
                    match chars.next() {
                        Some(escaped @ ('"' | '\\')) => current.push(escaped),
                        Some(other) => {
                            current.push('\\');
                            current.push(other);
                        }
                        None => return Err(CommandError::UnbalancedQuote),
                    }
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                '\\' => match chars.next() {
                    Some(escaped) => {
                        current.push(escaped);
                        in_token = true;
                    }
                    None => return Err(CommandError::UnbalancedQuote),
                },
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if quote.is_some() {
        return Err(CommandError::UnbalancedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Execute one received command line against the server state and produce
/// the response string for the client.
pub async fn dispatch(
    raw: &str,
    pager: &Pager,
    workers: &WorkerRegistry,
    speaker: &dyn Speaker,
) -> Result<String, CommandError> {
    let command = Command::parse(raw)?;
    debug!("dispatching {:?}", command);
    match command {
        Command::Enable => {
            pager.enable().await;
            Ok(SUCCESS.to_owned())
        }
        Command::Disable => {
            pager.disable().await;
            Ok(SUCCESS.to_owned())
        }
        Command::Status => {
            workers.reap().await;
            let running = workers.snapshot().await;
            Ok(pager.status(&running).await)
        }
        Command::Watchdog => {
            pager.heartbeat().await;
            Ok(SUCCESS.to_owned())
        }
        Command::Page { message } => pager
            .request_page(&message, speaker)
            .await
            .map_err(CommandError::ActionFailed),
        Command::Log { message } => {
            info!("log: {}", message);
            Ok(SUCCESS.to_owned())
        }
        Command::Exit => Err(CommandError::ExitOverDispatch),
    }
}
