//! `ponder chat`: interactive or single-message chat mode.
//!
//! Narrative goes to stdout; reasoning, status lines and errors go to
//! stderr so the answer can be piped on its own.

use std::io::Write;
use std::sync::Arc;

use ponder_agent::{AgentLoop, OutputEvent};
use ponder_config::AppConfig;
use ponder_core::session::SessionId;
use tokio::io::{AsyncBufReadExt, BufReader};

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub async fn run(
    message: Option<String>,
    session: Option<String>,
    hide_reasoning: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let agent = match AgentLoop::from_config(&config) {
        Ok(agent) => Arc::new(agent),
        Err(e) => {
            print_setup_help();
            return Err(format!("Agent not initialized: {e}").into());
        }
    };

    let session_id = match session {
        Some(raw) => SessionId::parse(&raw)?,
        None => SessionId::new(),
    };

    let mut renderer = Renderer::new(std::io::stdout(), std::io::stderr(), hide_reasoning);

    if let Some(msg) = message {
        // Single message mode
        stream_turn(&agent, &session_id, msg, &mut renderer).await?;
        return Ok(());
    }

    println!();
    println!("  Ponder: Interactive Mode");
    println!();
    println!("  Provider:  {}", agent.provider_name());
    println!("  Model:     {}", agent.model());
    println!("  Session:   {session_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        println!();
        stream_turn(&agent, &session_id, line.to_string(), &mut renderer).await?;
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

async fn stream_turn<O: Write, E: Write>(
    agent: &Arc<AgentLoop>,
    session_id: &SessionId,
    input: String,
    renderer: &mut Renderer<O, E>,
) -> std::io::Result<()> {
    let mut rx = agent.clone().run_turn(session_id.clone(), input);
    while let Some(event) = rx.recv().await {
        renderer.render(&event)?;
    }
    renderer.finish()
}

fn print_setup_help() {
    eprintln!();
    eprintln!("  No usable model provider is configured.");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    OPENROUTER_API_KEY = 'sk-or-v1-...'   (recommended)");
    eprintln!("    OPENAI_API_KEY     = 'sk-...'         (for OpenAI direct)");
    eprintln!("    PONDER_API_KEY     = 'sk-...'         (generic)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
}

/// Writes output events to a terminal as they arrive.
///
/// Reasoning is dimmed so it reads as an aside. A line break separates a
/// reasoning run from the narrative that follows it.
struct Renderer<O, E> {
    out: O,
    err: E,
    hide_reasoning: bool,
    in_reasoning: bool,
    wrote_narrative: bool,
}

impl<O: Write, E: Write> Renderer<O, E> {
    fn new(out: O, err: E, hide_reasoning: bool) -> Self {
        Self {
            out,
            err,
            hide_reasoning,
            in_reasoning: false,
            wrote_narrative: false,
        }
    }

    fn render(&mut self, event: &OutputEvent) -> std::io::Result<()> {
        match event {
            OutputEvent::ReasoningChunk(text) => {
                if self.hide_reasoning {
                    return Ok(());
                }
                self.in_reasoning = true;
                write!(self.err, "{DIM}{text}{RESET}")?;
                self.err.flush()
            }
            OutputEvent::NarrativeChunk(text) => {
                self.end_reasoning()?;
                self.wrote_narrative = true;
                write!(self.out, "{text}")?;
                self.out.flush()
            }
            OutputEvent::Status(line) => {
                self.end_reasoning()?;
                writeln!(self.err, "  [{line}]")
            }
            OutputEvent::Error(message) => {
                self.end_reasoning()?;
                writeln!(self.err, "  [Error] {message}")
            }
        }
    }

    /// Close off the turn's output.
    fn finish(&mut self) -> std::io::Result<()> {
        self.end_reasoning()?;
        if self.wrote_narrative {
            writeln!(self.out)?;
            self.wrote_narrative = false;
        }
        self.out.flush()
    }

    fn end_reasoning(&mut self) -> std::io::Result<()> {
        if self.in_reasoning {
            self.in_reasoning = false;
            writeln!(self.err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_all(events: &[OutputEvent], hide_reasoning: bool) -> (String, String) {
        let mut renderer = Renderer::new(Vec::new(), Vec::new(), hide_reasoning);
        for event in events {
            renderer.render(event).unwrap();
        }
        renderer.finish().unwrap();
        (
            String::from_utf8(renderer.out).unwrap(),
            String::from_utf8(renderer.err).unwrap(),
        )
    }

    fn sample_turn() -> Vec<OutputEvent> {
        vec![
            OutputEvent::ReasoningChunk("need ".into()),
            OutputEvent::ReasoningChunk("docs".into()),
            OutputEvent::Status("Searching: hostels".into()),
            OutputEvent::NarrativeChunk("There are ".into()),
            OutputEvent::NarrativeChunk("ten.".into()),
        ]
    }

    #[test]
    fn narrative_goes_to_stdout_only() {
        let (out, err) = render_all(&sample_turn(), false);
        assert_eq!(out, "There are ten.\n");
        assert_eq!(err, format!("{DIM}need {RESET}{DIM}docs{RESET}\n  [Searching: hostels]\n"));
    }

    #[test]
    fn hidden_reasoning_is_dropped() {
        let (out, err) = render_all(&sample_turn(), true);
        assert_eq!(out, "There are ten.\n");
        assert_eq!(err, "  [Searching: hostels]\n");
    }

    #[test]
    fn errors_are_reported_on_stderr() {
        let (out, err) = render_all(&[OutputEvent::Error("model stream failed".into())], false);
        assert!(out.is_empty());
        assert_eq!(err, "  [Error] model stream failed\n");
    }

    #[test]
    fn trailing_reasoning_is_terminated() {
        let (out, err) = render_all(&[OutputEvent::ReasoningChunk("hmm".into())], false);
        assert!(out.is_empty());
        assert!(err.ends_with(&format!("{RESET}\n")));
    }
}
