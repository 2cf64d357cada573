//! SMILES syntax check and summary

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;

use super::{is_element, MoleculeSummary};
use crate::error::{Error, Result};

const ORGANIC_TWO_LETTER: &[&str] = &["Cl", "Br"];
const ORGANIC_ONE_LETTER: &[char] = &['B', 'C', 'N', 'O', 'P', 'S', 'F', 'I'];
const AROMATIC_ORGANIC: &[char] = &['b', 'c', 'n', 'o', 'p', 's'];
const AROMATIC_BRACKET: &[&str] = &["se", "as", "te", "b", "c", "n", "o", "p", "s"];

/// Parse a SMILES string into a summary.
///
/// Implicit hydrogens are not derived; only hydrogens written in bracket
/// atoms count toward the formula.
pub fn parse_smiles(input: &str) -> Result<MoleculeSummary> {
    let smiles = input.trim();
    if smiles.is_empty() {
        return Err(Error::normalization("empty SMILES string"));
    }

    let mut parser = SmilesParser::new(smiles);
    parser.run()?;
    Ok(parser.summary)
}

struct SmilesParser<'a> {
    text: &'a str,
    chars: Peekable<CharIndices<'a>>,
    summary: MoleculeSummary,
    /// Index of the atom new atoms bond to
    previous: Option<u32>,
    branches: Vec<Option<u32>>,
    /// Open ring closures: label to opening atom
    rings: HashMap<u32, u32>,
    pending_bond: Option<usize>,
}

impl<'a> SmilesParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.char_indices().peekable(),
            summary: MoleculeSummary::default(),
            previous: None,
            branches: Vec::new(),
            rings: HashMap::new(),
            pending_bond: None,
        }
    }

    fn error(&self, pos: usize, message: &str) -> Error {
        Error::normalization(format!(
            "Invalid SMILES '{}' at position {}: {}",
            self.text, pos, message
        ))
    }

    fn run(&mut self) -> Result<()> {
        while let Some((pos, ch)) = self.chars.next() {
            match ch {
                '[' => self.bracket_atom(pos)?,
                '*' => self.add_atom(pos, None, 0)?,
                'A'..='Z' | 'a'..='z' => self.organic_atom(pos, ch)?,
                '-' | '=' | '#' | '$' | ':' | '/' | '\\' => {
                    if self.previous.is_none() || self.pending_bond.is_some() {
                        return Err(self.error(pos, "bond without a preceding atom"));
                    }
                    self.pending_bond = Some(pos);
                }
                '(' => {
                    if self.previous.is_none() || self.pending_bond.is_some() {
                        return Err(self.error(pos, "branch without a preceding atom"));
                    }
                    self.branches.push(self.previous);
                }
                ')' => {
                    if self.pending_bond.is_some() {
                        return Err(self.error(pos, "dangling bond before ')'"));
                    }
                    match self.branches.pop() {
                        Some(anchor) => self.previous = anchor,
                        None => return Err(self.error(pos, "unbalanced ')'")),
                    }
                }
                '.' => {
                    if self.pending_bond.is_some() || self.previous.is_none() {
                        return Err(self.error(pos, "misplaced '.'"));
                    }
                    self.previous = None;
                }
                '0'..='9' => {
                    let label = ch.to_digit(10).unwrap_or_default();
                    self.ring_bond(pos, label)?;
                }
                '%' => {
                    let label = self.two_digit_label(pos)?;
                    self.ring_bond(pos, label)?;
                }
                _ => return Err(self.error(pos, &format!("unexpected character '{}'", ch))),
            }
        }

        let end = self.text.len();
        if let Some(pos) = self.pending_bond {
            return Err(self.error(pos, "dangling bond at end of input"));
        }
        if !self.branches.is_empty() {
            return Err(self.error(end, "unclosed branch"));
        }
        if let Some(label) = self.rings.keys().min() {
            return Err(self.error(end, &format!("unclosed ring {}", label)));
        }
        if self.summary.atom_count == 0 {
            return Err(self.error(0, "no atoms"));
        }
        Ok(())
    }

    fn add_atom(&mut self, pos: usize, symbol: Option<&str>, hydrogens: u32) -> Result<()> {
        if let Some(symbol) = symbol {
            self.summary.add_element(symbol, 1);
        }
        self.summary.add_element("H", hydrogens);

        let index = self.summary.atom_count;
        self.summary.atom_count += 1;
        if self.previous.is_some() {
            self.summary.bond_count += 1;
        } else if self.pending_bond.is_some() {
            return Err(self.error(pos, "bond without a preceding atom"));
        }
        self.pending_bond = None;
        self.previous = Some(index);
        Ok(())
    }

    fn organic_atom(&mut self, pos: usize, first: char) -> Result<()> {
        if first.is_ascii_uppercase() {
            if let Some(&(_, second)) = self.chars.peek() {
                let pair: String = [first, second].iter().collect();
                if ORGANIC_TWO_LETTER.contains(&pair.as_str()) {
                    self.chars.next();
                    return self.add_atom(pos, Some(&pair), 0);
                }
            }
            if ORGANIC_ONE_LETTER.contains(&first) {
                return self.add_atom(pos, Some(&first.to_string()), 0);
            }
        } else if AROMATIC_ORGANIC.contains(&first) {
            let symbol = first.to_ascii_uppercase().to_string();
            return self.add_atom(pos, Some(&symbol), 0);
        }
        Err(self.error(pos, &format!("'{}' is not an organic-subset atom", first)))
    }

    fn bracket_atom(&mut self, open: usize) -> Result<()> {
        let text = self.text;
        let close = text[open..]
            .find(']')
            .map(|offset| open + offset)
            .ok_or_else(|| self.error(open, "unterminated bracket atom"))?;
        let body = &text[open + 1..close];

        // Skip the consumed characters in the main iterator
        while let Some(&(pos, _)) = self.chars.peek() {
            if pos > close {
                break;
            }
            self.chars.next();
        }

        let rest = body.trim_start_matches(|c: char| c.is_ascii_digit());
        let (symbol, rest) = bracket_symbol(rest).ok_or_else(|| {
            self.error(open, &format!("unknown element in '[{}]'", body))
        })?;
        let rest = rest.trim_start_matches('@');

        let (hydrogens, rest) = match rest.strip_prefix('H') {
            Some(after) => {
                let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
                let count = if digits.is_empty() { 1 } else { digits.parse().unwrap_or(1) };
                (count, &after[digits.len()..])
            }
            None => (0, rest),
        };

        let (charge, rest) = bracket_charge(rest);
        let rest = match rest.strip_prefix(':') {
            Some(class) if !class.is_empty() && class.chars().all(|c| c.is_ascii_digit()) => "",
            Some(_) => return Err(self.error(open, &format!("bad atom class in '[{}]'", body))),
            None => rest,
        };
        if !rest.is_empty() {
            return Err(self.error(open, &format!("unparsed '{}' in '[{}]'", rest, body)));
        }

        self.summary.charge += charge;
        let symbol = symbol.map(normalize_symbol);
        self.add_atom(open, symbol.as_deref(), hydrogens)
    }

    fn ring_bond(&mut self, pos: usize, label: u32) -> Result<()> {
        let current = self
            .previous
            .ok_or_else(|| self.error(pos, "ring closure without a preceding atom"))?;
        match self.rings.remove(&label) {
            Some(opening) => {
                if opening == current {
                    return Err(self.error(pos, "ring closure to the same atom"));
                }
                self.summary.bond_count += 1;
            }
            None => {
                self.rings.insert(label, current);
            }
        }
        self.pending_bond = None;
        Ok(())
    }

    fn two_digit_label(&mut self, pos: usize) -> Result<u32> {
        let mut label = 0;
        for _ in 0..2 {
            match self.chars.next() {
                Some((_, d)) if d.is_ascii_digit() => label = label * 10 + d.to_digit(10).unwrap_or(0),
                _ => return Err(self.error(pos, "'%' must be followed by two digits")),
            }
        }
        Ok(label)
    }
}

/// Split the element symbol off a bracket body. `None` inside the `Some`
/// means a wildcard atom.
fn bracket_symbol(body: &str) -> Option<(Option<&str>, &str)> {
    if let Some(rest) = body.strip_prefix('*') {
        return Some((None, rest));
    }
    for aromatic in AROMATIC_BRACKET {
        if let Some(rest) = body.strip_prefix(aromatic) {
            return Some((Some(*aromatic), rest));
        }
    }
    let mut chars = body.char_indices();
    let (_, first) = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if let Some((i, second)) = chars.next() {
        if second.is_ascii_lowercase() && is_element(&body[..i + 1]) {
            return Some((Some(&body[..i + 1]), &body[i + 1..]));
        }
    }
    if is_element(&body[..1]) {
        return Some((Some(&body[..1]), &body[1..]));
    }
    None
}

fn normalize_symbol(symbol: &str) -> String {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn bracket_charge(rest: &str) -> (i32, &str) {
    let sign = match rest.chars().next() {
        Some('+') => 1,
        Some('-') => -1,
        _ => return (0, rest),
    };
    let sign_char = if sign > 0 { '+' } else { '-' };
    let repeats = rest.chars().take_while(|&c| c == sign_char).count();
    let after = &rest[repeats..];
    if repeats == 1 {
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            let magnitude: i32 = digits.parse().unwrap_or(1);
            return (sign * magnitude, &after[digits.len()..]);
        }
    }
    (sign * repeats as i32, after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ethanol() {
        let summary = parse_smiles("CCO").unwrap();
        assert_eq!(summary.atom_count, 3);
        assert_eq!(summary.bond_count, 2);
        assert_eq!(summary.formula(), "C2O");
    }

    #[test]
    fn test_benzene_ring_closure() {
        let summary = parse_smiles("c1ccccc1").unwrap();
        assert_eq!(summary.atom_count, 6);
        assert_eq!(summary.bond_count, 6);
        assert_eq!(summary.formula(), "C6");
    }

    #[test]
    fn test_branches_and_two_letter_atoms() {
        let summary = parse_smiles("CC(Cl)(Br)C=O").unwrap();
        assert_eq!(summary.atom_count, 6);
        assert_eq!(summary.bond_count, 5);
        assert_eq!(summary.formula(), "C3BrClO");
    }

    #[test]
    fn test_bracket_atoms_charge_and_hydrogens() {
        let summary = parse_smiles("[NH4+].[Cl-]").unwrap();
        assert_eq!(summary.atom_count, 2);
        assert_eq!(summary.bond_count, 0);
        assert_eq!(summary.charge, 0);
        assert_eq!(summary.formula(), "ClH4N");

        let summary = parse_smiles("[13CH3][O-]").unwrap();
        assert_eq!(summary.charge, -1);
        assert_eq!(summary.formula(), "CH3O");

        let summary = parse_smiles("[Fe++]").unwrap();
        assert_eq!(summary.charge, 2);
        let summary = parse_smiles("[Co+3]").unwrap();
        assert_eq!(summary.charge, 3);
    }

    #[test]
    fn test_stereo_and_percent_rings() {
        let summary = parse_smiles("N[C@@H](C)C(=O)O").unwrap();
        assert_eq!(summary.atom_count, 6);
        let summary = parse_smiles("C%10CC%10").unwrap();
        assert_eq!(summary.bond_count, 3);
    }

    #[test]
    fn test_malformed_inputs() {
        for bad in ["", "C(", "C)", "C1CC", "C=", "=C", "Xx", "[Zz]", "C[C", "C..C", "(C)"] {
            let err = parse_smiles(bad).unwrap_err();
            assert!(matches!(err, Error::Normalization(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_error_mentions_input() {
        let err = parse_smiles("C1CC").unwrap_err();
        assert!(err.to_string().contains("unclosed ring 1"));
        assert!(err.to_string().contains("C1CC"));
    }
}
