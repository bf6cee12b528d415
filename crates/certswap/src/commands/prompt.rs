//! Interactive choice of the certificate to retire.

use std::io::{BufRead, IsTerminal, Write};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use certswap_rotation::{CertificateSelector, CertificateSummary, Selection};

use crate::format;

/// Lists the inventory on stderr and reads a number from stdin.
///
/// `q`, end of input or Ctrl+C cancels the run. Without a terminal there is
/// nobody to ask, so the selection fails instead of blocking.
pub struct PromptSelector {
    cancel: CancellationToken,
}

impl PromptSelector {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Run the blocking `read` on the blocking pool and give up on it once
    /// the run is cancelled. An abandoned reader is left to the runtime
    /// shutdown.
    async fn ask<F>(&self, names: Vec<String>, read: F) -> Selection
    where
        F: FnOnce(Vec<String>) -> Selection + Send + 'static,
    {
        let reader = tokio::task::spawn_blocking(move || read(names));
        tokio::select! {
            joined = reader => joined.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Prompt failed");
                Selection::Cancelled
            }),
            () = self.cancel.cancelled() => {
                eprintln!();
                Selection::Cancelled
            }
        }
    }
}

#[async_trait]
impl CertificateSelector for PromptSelector {
    async fn select(&self, inventory: &[CertificateSummary]) -> Selection {
        if inventory.is_empty() {
            return Selection::NoMatch("no certificates on the appliance".to_string());
        }
        if !std::io::stdin().is_terminal() {
            return Selection::NoMatch(
                "stdin is not a terminal; pass --retire or --retire-cn".to_string(),
            );
        }

        format::certificate_list(inventory, Utc::now());
        let names = inventory.iter().map(|c| c.name.clone()).collect();
        self.ask(names, read_choice).await
    }
}

fn read_choice(names: Vec<String>) -> Selection {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    loop {
        eprint!(
            "\nSelect certificate to replace (1-{}, or 'q' to quit): ",
            names.len()
        );
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return Selection::Cancelled,
            Ok(_) => {}
        }
        match parse_choice(&line, names.len()) {
            Choice::Index(i) => {
                let name = names[i].clone();
                eprintln!("Selected: {name}");
                return Selection::Chosen(name);
            }
            Choice::Quit => return Selection::Cancelled,
            Choice::OutOfRange => eprintln!("Please enter a number between 1 and {}", names.len()),
            Choice::Invalid => eprintln!("Invalid input. Please enter a number or 'q' to quit."),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Choice {
    /// Zero-based position in the inventory.
    Index(usize),
    Quit,
    OutOfRange,
    Invalid,
}

fn parse_choice(input: &str, len: usize) -> Choice {
    let input = input.trim();
    if input.eq_ignore_ascii_case("q") {
        return Choice::Quit;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Choice::Index(n - 1),
        Ok(_) => Choice::OutOfRange,
        Err(_) => Choice::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn names() -> Vec<String> {
        vec!["old-wildcard".to_string(), "root-ca".to_string()]
    }

    #[test]
    fn choices_are_one_based() {
        assert_eq!(parse_choice("1\n", 3), Choice::Index(0));
        assert_eq!(parse_choice(" 3 ", 3), Choice::Index(2));
        assert_eq!(parse_choice("0", 3), Choice::OutOfRange);
        assert_eq!(parse_choice("4", 3), Choice::OutOfRange);
    }

    #[test]
    fn quit_and_garbage() {
        assert_eq!(parse_choice("Q\n", 3), Choice::Quit);
        assert_eq!(parse_choice("old-wildcard", 3), Choice::Invalid);
        assert_eq!(parse_choice("", 3), Choice::Invalid);
    }

    #[tokio::test]
    async fn answer_from_the_reader_is_returned() {
        let selector = PromptSelector::new(CancellationToken::new());
        let selection = selector
            .ask(names(), |names| Selection::Chosen(names[1].clone()))
            .await;
        assert_eq!(selection, Selection::Chosen("root-ca".to_string()));
    }

    #[tokio::test]
    async fn interrupt_abandons_a_waiting_prompt() {
        let cancel = CancellationToken::new();
        let selector = PromptSelector::new(cancel.clone());
        let (release, blocked) = mpsc::channel::<()>();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let selection = selector
            .ask(names(), move |names| {
                let _ = blocked.recv();
                Selection::Chosen(names[0].clone())
            })
            .await;
        assert_eq!(selection, Selection::Cancelled);
        drop(release);
    }
}
