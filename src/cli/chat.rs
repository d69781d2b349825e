use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{AppError, Result};
use crate::session::{ChatSession, Rejection, SendOutcome};

use super::render::{TurnRenderer, write_intro};

const QUIT_COMMANDS: [&str; 2] = ["/quit", "/exit"];

/// Sends one question, rendering snapshots as the session publishes them.
pub async fn run_turn<W: Write>(
    session: &ChatSession,
    question: &str,
    out: W,
) -> Result<(SendOutcome, W)> {
    let mut renderer = TurnRenderer::new(out);
    let mut updates = session.subscribe();

    let send = session.send(question);
    tokio::pin!(send);

    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            changed = updates.changed() => {
                if changed.is_err() {
                    break (&mut send).await;
                }
                let snapshot = updates.borrow_and_update().clone();
                renderer.render(&snapshot)?;
            }
        }
    };

    if !outcome.is_rejected() {
        renderer.render(&session.snapshot())?;
    }
    let out = renderer.finish()?;
    Ok((outcome, out))
}

pub async fn run_repl(session: &ChatSession) -> Result<()> {
    let mut stdout = std::io::stdout();
    write_intro(&mut stdout)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if QUIT_COMMANDS.contains(&line.trim()) {
            break;
        }

        let (outcome, out) = run_turn(session, &line, stdout).await?;
        stdout = out;

        match outcome {
            SendOutcome::Rejected(Rejection::Busy) => {
                tracing::warn!("Previous reply still in flight");
            }
            SendOutcome::Rejected(Rejection::EmptyQuestion)
            | SendOutcome::Streamed { .. }
            | SendOutcome::Recovered { .. }
            | SendOutcome::Apologized { .. } => {}
        }
    }

    Ok(())
}

/// One-shot mode: send `question`, print the reply, and return.
pub async fn run_ask(session: &ChatSession, question: &str, json: bool) -> Result<()> {
    if question.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "question must not be empty".to_string(),
        ));
    }

    let outcome = if json {
        let outcome = session.send(question).await;
        let snapshot = session.snapshot();
        let reply = outcome.message_id().and_then(|id| snapshot.find(id));
        println!("{}", serde_json::to_string_pretty(&reply)?);
        outcome
    } else {
        run_turn(session, question, std::io::stdout()).await?.0
    };

    tracing::debug!(?outcome, "Ask finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportError};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_turn_renders_stream() {
        let mock = MockTransport::new().with_stream_chunks(&["Take ", "a deep ", "breath."]);
        let session = ChatSession::new(Arc::new(mock));

        let (outcome, out) = run_turn(&session, "I'm stressed", Vec::new())
            .await
            .expect("turn");

        assert!(matches!(outcome, SendOutcome::Streamed { .. }));
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.ends_with("Take a deep breath.\n"));
    }

    #[tokio::test]
    async fn test_run_turn_renders_apology() {
        let mock = MockTransport::new()
            .with_stream_refused(TransportError::network("refused"))
            .with_buffered_failure(TransportError::network("refused"));
        let session = ChatSession::new(Arc::new(mock));

        let (outcome, out) = run_turn(&session, "hello", Vec::new())
            .await
            .expect("turn");

        assert!(matches!(outcome, SendOutcome::Apologized { .. }));
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains(crate::session::DEFAULT_APOLOGY));
    }

    #[tokio::test]
    async fn test_run_turn_blank_question_prints_nothing() {
        let session = ChatSession::new(Arc::new(MockTransport::new()));

        let (outcome, out) = run_turn(&session, "  ", Vec::new()).await.expect("turn");

        assert!(outcome.is_rejected());
        assert_eq!(out, b"\n");
    }

    #[tokio::test]
    async fn test_run_ask_rejects_blank_question() {
        let session = ChatSession::new(Arc::new(MockTransport::new()));
        let result = run_ask(&session, "   ", false).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
