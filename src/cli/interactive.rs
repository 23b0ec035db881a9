//! Interactive fleet picker
//!
//! [`Prompt`] turns each typed line into an [`Action`]; the binary owns the
//! stdin loop and performs the runs.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::display::{format_help, format_search_results};
use crate::search::{parse_command, parse_selection, search, Command, SearchResults};

/// What the caller should do with one line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print this text and prompt again
    Print(String),
    /// Run the configured mode over these fleets
    Run(Vec<String>),
    /// Print the full fleet list
    List,
    Exit,
    Continue,
}

/// Prompt state: the fleet names and the last search results
pub struct Prompt {
    names: Vec<String>,
    results: SearchResults,
}

impl Prompt {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            results: SearchResults::default(),
        }
    }

    pub fn banner(dry_run: bool) -> &'static str {
        if dry_run {
            "(DRY RUN) Type something to search"
        } else {
            "Type something to search"
        }
    }

    pub fn handle(&mut self, line: &str) -> Action {
        match parse_command(line) {
            Command::Empty => Action::Continue,
            Command::Help => Action::Print(format_help()),
            Command::Exit => Action::Exit,
            Command::List => Action::List,
            Command::Search(query) => {
                self.results = search(&self.names, &query);
                Action::Print(format_search_results(&self.results))
            }
            Command::Run(ids) => match parse_selection(&ids, &self.results) {
                Ok(fleets) => Action::Run(fleets),
                Err(e) => Action::Print(format!("Error: {}\n", e)),
            },
        }
    }
}

/// Read the next line, `None` at end of input
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
