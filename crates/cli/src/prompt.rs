//! Terminal prompting

use std::io::IsTerminal;

use aliasboot_core::{Error, Prompter, Result};
use async_trait::async_trait;
use console::Term;

/// Whether the user can answer prompts on this terminal
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && Term::stdout().is_term()
}

/// [`Prompter`] reading answers from the controlling terminal
///
/// Prompts go to stderr so that JSON on stdout stays clean. Reads run on
/// the blocking pool; dropping the future abandons the read.
#[derive(Debug, Clone, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    async fn ask(prompt: &str, secret: bool) -> Result<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            let term = Term::stderr();
            term.write_str(&prompt)?;
            if secret {
                term.read_secure_line()
            } else {
                term.read_line()
            }
        })
        .await
        .map_err(|e| Error::General(format!("Prompt task failed: {e}")))?
        .map_err(Error::from)
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn read_line(&self, prompt: &str) -> Result<String> {
        Self::ask(prompt, false).await
    }

    async fn read_secret(&self, prompt: &str) -> Result<String> {
        Self::ask(prompt, true).await
    }
}
