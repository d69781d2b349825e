use std::io::{self, Write};

use crate::session::{MessageId, Role, Snapshot};

const INTRO: &str = "Hi, I'm here to listen. How are you feeling today? (type /quit to leave)";
const TYPING: &str = "…";

pub fn write_intro(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{INTRO}")
}

/// Writes the growing assistant reply of the current turn to a terminal.
///
/// Streamed content only ever extends, so each update prints just the new
/// suffix. A reply whose content was replaced wholesale (fallback answer or
/// apology) is reprinted on a fresh line.
pub struct TurnRenderer<W: Write> {
    out: W,
    reply_id: Option<MessageId>,
    printed: String,
    typing_shown: bool,
}

impl<W: Write> TurnRenderer<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out,
            reply_id: None,
            printed: String::new(),
            typing_shown: false,
        }
    }

    pub fn render(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        let Some(reply) = snapshot.last().filter(|m| m.role == Role::Assistant) else {
            return Ok(());
        };

        match self.reply_id {
            None => self.reply_id = Some(reply.id),
            Some(id) if id != reply.id => return Ok(()),
            Some(_) => {}
        }

        if reply.is_awaiting_content() {
            if !self.typing_shown {
                write!(self.out, "{TYPING}")?;
                self.typing_shown = true;
            }
        } else if let Some(suffix) = reply.content.strip_prefix(self.printed.as_str()) {
            self.clear_typing()?;
            write!(self.out, "{suffix}")?;
            self.printed.clone_from(&reply.content);
        } else {
            self.clear_typing()?;
            writeln!(self.out)?;
            write!(self.out, "{}", reply.content)?;
            self.printed.clone_from(&reply.content);
        }

        self.out.flush()
    }

    pub fn finish(mut self) -> io::Result<W> {
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn clear_typing(&mut self) -> io::Result<()> {
        if self.typing_shown {
            // Backspace over the indicator, blank it, and step back again.
            write!(self.out, "\u{8} \u{8}")?;
            self.typing_shown = false;
        }
        Ok(())
    }
}
