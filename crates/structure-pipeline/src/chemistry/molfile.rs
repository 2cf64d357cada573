//! MDL molfile (V2000) connection table check and summary

use super::{is_element, MoleculeSummary};
use crate::error::{Error, Result};

/// Query and pseudo atoms that count as atoms but carry no element
const PSEUDO_ATOMS: &[&str] = &["*", "A", "Q", "L", "LP", "R#", "R"];

/// Parse a V2000 molfile into a summary
pub fn parse_molfile(input: &str) -> Result<MoleculeSummary> {
    let lines: Vec<&str> = input.lines().collect();
    let name = lines.first().map(|l| l.trim()).unwrap_or_default();
    let fail = |message: String| {
        let label = if name.is_empty() { "<unnamed>" } else { name };
        Error::normalization(format!("Invalid molfile '{}': {}", label, message))
    };

    let counts = lines
        .get(3)
        .ok_or_else(|| fail("missing counts line".to_string()))?;
    if counts.contains("V3000") {
        return Err(fail("V3000 connection tables are not supported".to_string()));
    }
    let atoms = fixed_width_number(counts, 0, 3)
        .ok_or_else(|| fail(format!("bad atom count in '{}'", counts)))?;
    let bonds = fixed_width_number(counts, 3, 6)
        .ok_or_else(|| fail(format!("bad bond count in '{}'", counts)))?;

    let atom_start = 4;
    let bond_start = atom_start + atoms as usize;
    if lines.len() < bond_start + bonds as usize {
        return Err(fail(format!(
            "expected {} atom and {} bond lines, found {} lines",
            atoms,
            bonds,
            lines.len().saturating_sub(atom_start)
        )));
    }

    let mut summary = MoleculeSummary {
        atom_count: atoms,
        bond_count: bonds,
        ..Default::default()
    };

    let mut block_charge = 0;
    for (offset, line) in lines[atom_start..bond_start].iter().enumerate() {
        let symbol = line
            .get(31..line.len().min(34))
            .map(str::trim)
            .unwrap_or_default();
        if symbol.is_empty() {
            return Err(fail(format!("atom {} has no symbol", offset + 1)));
        }
        if is_element(symbol) {
            summary.add_element(symbol, 1);
        } else if !PSEUDO_ATOMS.contains(&symbol) {
            return Err(fail(format!("atom {} has unknown symbol '{}'", offset + 1, symbol)));
        }
        block_charge += atom_block_charge(line);
    }

    for (offset, line) in lines[bond_start..bond_start + bonds as usize].iter().enumerate() {
        let first = fixed_width_number(line, 0, 3);
        let second = fixed_width_number(line, 3, 6);
        match (first, second) {
            (Some(a), Some(b)) if a >= 1 && b >= 1 && a <= atoms && b <= atoms && a != b => {}
            _ => return Err(fail(format!("bond {} references invalid atoms", offset + 1))),
        }
    }

    // M  CHG properties supersede the atom block charges
    let mut property_charge: Option<i32> = None;
    for line in &lines[bond_start + bonds as usize..] {
        if line.starts_with("M  END") {
            break;
        }
        if let Some(values) = line.strip_prefix("M  CHG") {
            let fields: Vec<i32> = values
                .split_whitespace()
                .map(|f| f.parse::<i32>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| fail(format!("bad charge property '{}'", line)))?;
            let overflow = || fail(format!("charge overflow in '{}'", line));
            let pairs = fields.iter().skip(1).collect::<Vec<_>>();
            let total = pairs
                .chunks(2)
                .filter_map(|p| p.get(1).map(|v| **v))
                .try_fold(0i32, i32::checked_add)
                .ok_or_else(overflow)?;
            let charge = property_charge.get_or_insert(0);
            *charge = charge.checked_add(total).ok_or_else(overflow)?;
        }
    }
    summary.charge = property_charge.unwrap_or(block_charge);

    Ok(summary)
}

fn fixed_width_number(line: &str, start: usize, end: usize) -> Option<u32> {
    let end = end.min(line.len());
    line.get(start..end)?.trim().parse().ok()
}

/// Legacy charge code in columns 37-39 of an atom line
fn atom_block_charge(line: &str) -> i32 {
    match line.get(36..39).map(str::trim) {
        Some("1") => 3,
        Some("2") => 2,
        Some("3") => 1,
        Some("5") => -1,
        Some("6") => -2,
        Some("7") => -3,
        _ => 0,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const ETHANOL: &str = "ethanol
  test

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.5000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.0000    1.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
M  END
";

    #[test]
    fn test_ethanol() {
        let summary = parse_molfile(ETHANOL).unwrap();
        assert_eq!(summary.atom_count, 3);
        assert_eq!(summary.bond_count, 2);
        assert_eq!(summary.formula(), "C2O");
        assert_eq!(summary.charge, 0);
    }

    #[test]
    fn test_charge_property_wins() {
        let text = ETHANOL.replace("M  END", "M  CHG  1   3  -1\nM  END");
        let summary = parse_molfile(&text).unwrap();
        assert_eq!(summary.charge, -1);
    }

    #[test]
    fn test_charge_property_overflow_is_rejected() {
        let text = ETHANOL.replace("M  END", "M  CHG  2   1 2147483647   2   1\nM  END");
        let err = parse_molfile(&text).unwrap_err();
        assert!(err.to_string().contains("charge overflow"));

        let split = "M  CHG  1   1 2147483647\nM  CHG  1   2   1\nM  END";
        assert!(parse_molfile(&ETHANOL.replace("M  END", split)).is_err());

        let low = ETHANOL.replace("M  END", "M  CHG  2   1 -2147483648   2  -1\nM  END");
        assert!(parse_molfile(&low).is_err());
    }

    #[test]
    fn test_atom_block_charge() {
        let text = ETHANOL.replace(
            "2.0000    1.0000    0.0000 O   0  0",
            "2.0000    1.0000    0.0000 O   0  5",
        );
        let summary = parse_molfile(&text).unwrap();
        assert_eq!(summary.charge, -1);
    }

    #[test]
    fn test_truncated_atom_block() {
        let text: String = ETHANOL.lines().take(5).collect::<Vec<_>>().join("\n");
        let err = parse_molfile(&text).unwrap_err();
        assert!(err.to_string().contains("ethanol"));
    }

    #[test]
    fn test_missing_counts_line() {
        assert!(parse_molfile("name\nprogram\n").is_err());
    }

    #[test]
    fn test_unknown_symbol() {
        let text = ETHANOL.replace(" O   0", " Xq  0");
        assert!(parse_molfile(&text).is_err());
    }
}
