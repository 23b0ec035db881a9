//! Fleet search for the interactive prompt
//!
//! SBIO pattern: pure functions over the sorted fleet-name list. The prompt
//! loop lives in `cli::interactive`.

use thiserror::Error;

/// Errors in a `/r` selection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No result ids provided")]
    Empty,

    #[error("Too many fleets specified: {requested} ids for {available} results")]
    TooMany { requested: usize, available: usize },

    #[error("'{0}' is not a result id")]
    NotANumber(String),

    #[error("No result with id {0}")]
    OutOfRange(usize),
}

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    List,
    /// `/r ID [ID ...]`
    Run(String),
    Search(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line {
        "" => Command::Empty,
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        "ls" => Command::List,
        _ => match line.strip_prefix("/r") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                Command::Run(rest.trim().to_string())
            }
            _ => Command::Search(line.to_string()),
        },
    }
}

/// Numbered results of the last search, ids starting at 1
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    entries: Vec<String>,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        id.checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|s| s.as_str())
    }

    /// `(id, name)` pairs in display order
    pub fn numbered(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, name)| (i + 1, name.as_str()))
    }
}

/// Case-insensitive substring search; commas separate alternative terms
pub fn search(names: &[String], query: &str) -> SearchResults {
    let terms: Vec<String> = query
        .split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();

    let entries = names
        .iter()
        .filter(|name| {
            let upper = name.to_uppercase();
            terms.iter().any(|term| upper.contains(term.as_str()))
        })
        .cloned()
        .collect();

    SearchResults { entries }
}

/// Resolve `/r` ids against the last results, keeping first-seen order
pub fn parse_selection(ids: &str, results: &SearchResults) -> Result<Vec<String>, SelectionError> {
    let ids: Vec<&str> = ids.split_whitespace().collect();
    if ids.is_empty() {
        return Err(SelectionError::Empty);
    }
    if ids.len() > results.len() {
        return Err(SelectionError::TooMany {
            requested: ids.len(),
            available: results.len(),
        });
    }

    let mut selected: Vec<String> = Vec::with_capacity(ids.len());
    for raw in ids {
        let id: usize = raw
            .parse()
            .map_err(|_| SelectionError::NotANumber(raw.to_string()))?;
        let name = results.get(id).ok_or(SelectionError::OutOfRange(id))?;
        if !selected.iter().any(|s| s == name) {
            selected.push(name.to_string());
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        ["api-gateway", "Billing-Workers", "gateway-canary", "search"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("help"), Command::Help);
        assert_eq!(parse_command(" exit "), Command::Exit);
        assert_eq!(parse_command("ls"), Command::List);
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(parse_command("/r 1 2"), Command::Run("1 2".to_string()));
        assert_eq!(parse_command("/r"), Command::Run(String::new()));
        assert_eq!(parse_command("/rest"), Command::Search("/rest".to_string()));
        assert_eq!(parse_command("gate"), Command::Search("gate".to_string()));
    }

    #[test]
    fn test_search_is_case_insensitive_or() {
        let results = search(&names(), "GATEWAY, billing");
        let found: Vec<_> = results.numbered().collect();
        assert_eq!(
            found,
            vec![(1, "api-gateway"), (2, "Billing-Workers"), (3, "gateway-canary")]
        );
    }

    #[test]
    fn test_search_no_match() {
        assert!(search(&names(), "nothing").is_empty());
        assert!(search(&names(), " , ").is_empty());
    }

    #[test]
    fn test_parse_selection() {
        let results = search(&names(), "gateway");
        assert_eq!(
            parse_selection("2 1 2", &SearchResults {
                entries: vec!["a".into(), "b".into(), "c".into()]
            })
            .unwrap(),
            vec!["b".to_string(), "a".to_string()]
        );
        assert_eq!(
            parse_selection("1", &results).unwrap(),
            vec!["api-gateway".to_string()]
        );
    }

    #[test]
    fn test_selection_errors() {
        let results = search(&names(), "gateway");
        assert_eq!(parse_selection("  ", &results), Err(SelectionError::Empty));
        assert_eq!(
            parse_selection("1 2 3", &results),
            Err(SelectionError::TooMany {
                requested: 3,
                available: 2
            })
        );
        assert_eq!(
            parse_selection("x", &results),
            Err(SelectionError::NotANumber("x".to_string()))
        );
        assert_eq!(parse_selection("0", &results), Err(SelectionError::OutOfRange(0)));
        assert_eq!(parse_selection("5", &results), Err(SelectionError::OutOfRange(5)));
    }
}
