//! Console – operator REPL for a running agent.
//!
//! Supported slash-commands:
//!   /help               – show this list
//!   /status             – print the latest status snapshot
//!   /goal <text>        – replace the long-term goal
//!   /say <user> <text>  – inject an in-game chat line
//!   /server <message>   – inject a server/system message
//!   /config             – show the active configuration (keys redacted)
//!   /quit | /exit       – stop the agent and exit
//!
//! Any other line is queued as an operator directive.

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use blockmind_runtime::{ControlError, ControlHandle, StatusSnapshot};

use crate::config::Config;

/// Source name attached to directives typed at the console.
pub const CONSOLE_SOURCE: &str = "console";

const RECENT_EVENTS_SHOWN: usize = 5;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Empty,
    Help,
    Status,
    Goal(String),
    Say { user: String, text: String },
    Server(String),
    Config,
    Quit,
    Directive(String),
    /// Slash-command that was not recognised or is missing its argument.
    Invalid(String),
}

/// Parse one console line.
pub fn parse(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    if !line.starts_with('/') {
        return ConsoleCommand::Directive(line.to_string());
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "/help" => ConsoleCommand::Help,
        "/status" => ConsoleCommand::Status,
        "/config" => ConsoleCommand::Config,
        "/quit" | "/exit" => ConsoleCommand::Quit,
        "/goal" if !rest.is_empty() => ConsoleCommand::Goal(rest.to_string()),
        "/server" if !rest.is_empty() => ConsoleCommand::Server(rest.to_string()),
        "/say" => match rest.split_once(char::is_whitespace) {
            Some((user, text)) if !text.trim().is_empty() => ConsoleCommand::Say {
                user: user.to_string(),
                text: text.trim().to_string(),
            },
            _ => ConsoleCommand::Invalid(line.to_string()),
        },
        _ => ConsoleCommand::Invalid(line.to_string()),
    }
}

/// Entry point for the interactive console.
///
/// Returns when the operator quits, stdin closes, the agent stops, or
/// `shutdown` is set.
pub fn run(handle: &ControlHandle, cfg: &Config, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Console unavailable".red(), e);
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline("blockmind> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }

        let outcome = match parse(&line) {
            ConsoleCommand::Empty => Ok(()),
            ConsoleCommand::Help => {
                cmd_help();
                Ok(())
            }
            ConsoleCommand::Status => {
                print_status(&handle.status());
                Ok(())
            }
            ConsoleCommand::Config => {
                println!("{:#?}", cfg);
                Ok(())
            }
            ConsoleCommand::Goal(goal) => handle
                .set_goal(&goal)
                .map(|()| println!("  {} goal updated", "✓".green())),
            ConsoleCommand::Say { user, text } => handle.chat_message(&user, &text),
            ConsoleCommand::Server(message) => handle.server_message(&message),
            ConsoleCommand::Directive(text) => handle
                .submit_directive(CONSOLE_SOURCE, &text)
                .map(|()| println!("  {} directive queued", "✓".green())),
            ConsoleCommand::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
            ConsoleCommand::Invalid(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            Err(ControlError::Closed) => {
                println!("{}", "Agent loop has stopped.".yellow());
                break;
            }
            Err(e) => println!("{}: {}", "Rejected".red(), e),
        }
    }

    shutdown.store(true, Ordering::SeqCst);
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "BlockMind Commands".bold().underline());
    println!("  {}  – show this list", "/help".bold().cyan());
    println!("  {}  – print the latest status snapshot", "/status".bold().cyan());
    println!("  {}  – replace the long-term goal", "/goal <text>".bold().cyan());
    println!("  {}  – inject an in-game chat line", "/say <user> <text>".bold().cyan());
    println!("  {}  – inject a server message", "/server <message>".bold().cyan());
    println!("  {}  – show the active configuration", "/config".bold().cyan());
    println!("  {}  – stop the agent and exit", "/quit".bold().cyan());
    println!("  Anything else is sent to the agent as a directive.");
    println!();
}

fn print_status(status: &StatusSnapshot) {
    println!();
    println!("{}", format!("Tick {}", status.ticks).bold().underline());
    println!("  goal:       {}", status.goal);
    println!("  objective:  {}", status.objective.to_string().bold());
    println!(
        "  server:     {}",
        status.server_name.as_deref().unwrap_or("unknown").dimmed()
    );
    if let Some(decision) = &status.last_decision {
        println!(
            "  decision:   {} ({:?}) – {}",
            decision.kind().as_str().bold(),
            decision.source,
            decision.reason
        );
    }
    if let Some(result) = &status.last_result {
        if result.ok {
            println!("  result:     {}", "ok".green());
        } else {
            println!(
                "  result:     {} {}",
                "failed".red(),
                result.error.as_deref().unwrap_or_default()
            );
        }
    }
    if let Some(directive) = &status.pending_directive {
        println!("  directive:  {}", directive.yellow());
    }
    let planner = if status.planner_in_flight { "thinking" } else { "idle" };
    println!("  planner:    {}", planner);
    if let Some(error) = &status.planner_error {
        println!("  planner error: {}", error.red());
    }
    if let Some(watchdog) = &status.watchdog {
        println!(
            "  watchdog:   {}ms since progress, {} idle ticks, {} repeats",
            watchdog.since_progress_ms, watchdog.no_progress_ticks, watchdog.same_decision_count
        );
        for (kind, remaining_ms) in &watchdog.blocked {
            println!("    blocked {} for {}ms", kind.as_str().yellow(), remaining_ms);
        }
    }
    println!("  allowed:    {}", status.allowed_actions.join(",").dimmed());
    let skip = status.recent_events.len().saturating_sub(RECENT_EVENTS_SHOWN);
    for event in status.recent_events.iter().skip(skip) {
        println!(
            "    {} {:?} {}",
            event.at.format("%H:%M:%S").to_string().dimmed(),
            event.kind,
            event.data
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_directive() {
        assert_eq!(
            parse("  collect some oak logs "),
            ConsoleCommand::Directive("collect some oak logs".to_string())
        );
    }

    #[test]
    fn blank_line_is_empty() {
        assert_eq!(parse("   "), ConsoleCommand::Empty);
    }

    #[test]
    fn goal_requires_text() {
        assert_eq!(
            parse("/goal build a house"),
            ConsoleCommand::Goal("build a house".to_string())
        );
        assert_eq!(parse("/goal"), ConsoleCommand::Invalid("/goal".to_string()));
    }

    #[test]
    fn say_splits_user_and_text() {
        assert_eq!(
            parse("/say alice !status please"),
            ConsoleCommand::Say {
                user: "alice".to_string(),
                text: "!status please".to_string()
            }
        );
        assert!(matches!(parse("/say alice"), ConsoleCommand::Invalid(_)));
    }

    #[test]
    fn server_message_keeps_full_text() {
        assert_eq!(
            parse("/server Servers: lobby, survival-1"),
            ConsoleCommand::Server("Servers: lobby, survival-1".to_string())
        );
    }

    #[test]
    fn quit_aliases() {
        assert_eq!(parse("/quit"), ConsoleCommand::Quit);
        assert_eq!(parse("/exit"), ConsoleCommand::Quit);
    }

    #[test]
    fn unknown_slash_command_is_invalid() {
        assert_eq!(parse("/dance"), ConsoleCommand::Invalid("/dance".to_string()));
    }
}
