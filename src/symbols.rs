//! Reader for `nm`-style symbol listings.
//!
//! Each line is `<hex-address> <type> <name>`. Only text symbols (type `t` or `T`) are kept,
//! and any line that does not parse is skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::trace;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Symbol {
    pub address: u64,
    pub name: String,
}

/// Read the text symbols listed in the file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Symbol>> {
    let path = path.as_ref();

    let file = File::open(path).map_err(|source| Error::SymbolFile {
        path: path.to_owned(),
        source,
    })?;

    parse(BufReader::new(file))
}

/// Read the text symbols listed by `reader`.
pub fn parse(reader: impl BufRead) -> Result<Vec<Symbol>> {
    let mut symbols = vec![];

    for line in reader.lines() {
        let line = line?;

        match parse_line(&line) {
            Some(symbol) => symbols.push(symbol),
            None => trace!(%line, "skipping symbol line"),
        }
    }

    Ok(symbols)
}

fn parse_line(line: &str) -> Option<Symbol> {
    let mut fields = line.split_whitespace();

    let address = fields.next()?;
    let ty = fields.next()?;
    let name = fields.next()?;

    let address = address.trim_start_matches("0x").trim_start_matches("0X");
    let address = u64::from_str_radix(address, 16).ok()?;

    if !matches!(ty, "t" | "T") {
        return None;
    }

    let name = name.to_owned();

    Some(Symbol { address, name })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(s: &str) -> Vec<Symbol> {
        parse(s.as_bytes()).unwrap()
    }

    fn sym(address: u64, name: &str) -> Symbol {
        Symbol { address, name: name.into() }
    }

    #[test]
    fn test_parse_nm_output() {
        let nm = "\
0000000000001000 T foo
0000000000001040 t bar
0000000000004010 B counter
                 U puts@GLIBC_2.2.5
0000000000002000 R message
";

        assert_eq!(parse_str(nm), vec![sym(0x1000, "foo"), sym(0x1040, "bar")]);
    }

    #[test]
    fn test_parse_prefixed_address() {
        assert_eq!(parse_str("0x401126 T main\n"), vec![sym(0x401126, "main")]);
    }

    #[test]
    fn test_skip_malformed() {
        let input = "\
zzzz T nothex
1000 TT long_type
1000 T
\t
2000 T ok extra fields
";

        assert_eq!(parse_str(input), vec![sym(0x2000, "ok")]);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_str("").is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load("/nonexistent/symbols.txt").unwrap_err();

        assert!(matches!(err, Error::SymbolFile { .. }));
        assert_eq!(err.to_string(), "File /nonexistent/symbols.txt cannot be opened for reading");
    }
}
