//! Default chemistry step: validates raw molecules and summarizes them
//!
//! The normalizer checks syntax, counts atoms and
//! bonds, derives a Hill formula of the explicit atoms and the net charge.
//! Deployments with a real toolkit plug their own [`StructureNormalizer`].
//!
//! [`StructureNormalizer`]: crate::providers::StructureNormalizer

pub(crate) mod molfile;
mod normalizer;
mod smiles;

use std::collections::BTreeMap;

pub use molfile::parse_molfile;
pub use normalizer::BasicNormalizer;
pub use smiles::parse_smiles;

/// Element symbols accepted in bracket atoms and atom blocks
const ELEMENTS: &[&str] = &[
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S",
    "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga",
    "Ge", "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd",
    "Ag", "Cd", "In", "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm",
    "Sm", "Eu", "Gd", "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os",
    "Ir", "Pt", "Au", "Hg", "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa",
    "U", "Np", "Pu", "Am", "Cm", "Bk", "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg",
    "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh", "Fl", "Mc", "Lv", "Ts", "Og",
];

pub(crate) fn is_element(symbol: &str) -> bool {
    ELEMENTS.contains(&symbol)
}

/// Counts gathered while parsing a molecule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoleculeSummary {
    /// Element symbol to count
    pub elements: BTreeMap<String, u32>,
    pub atom_count: u32,
    pub bond_count: u32,
    pub charge: i32,
}

impl MoleculeSummary {
    pub(crate) fn add_element(&mut self, symbol: &str, count: u32) {
        if count > 0 {
            *self.elements.entry(symbol.to_string()).or_insert(0) += count;
        }
    }

    /// Hill-order formula: C, then H, then the rest alphabetically.
    /// Without carbon everything is alphabetical.
    pub fn formula(&self) -> String {
        let mut out = String::new();
        let mut push = |symbol: &str, count: u32| {
            out.push_str(symbol);
            if count > 1 {
                out.push_str(&count.to_string());
            }
        };

        if let Some(&carbon) = self.elements.get("C") {
            push("C", carbon);
            if let Some(&hydrogen) = self.elements.get("H") {
                push("H", hydrogen);
            }
            for (symbol, &count) in &self.elements {
                if symbol != "C" && symbol != "H" {
                    push(symbol, count);
                }
            }
        } else {
            for (symbol, &count) in &self.elements {
                push(symbol, count);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hill_formula() {
        let mut summary = MoleculeSummary::default();
        summary.add_element("O", 1);
        summary.add_element("C", 2);
        summary.add_element("H", 6);
        summary.add_element("Br", 1);
        assert_eq!(summary.formula(), "C2H6BrO");
    }

    #[test]
    fn test_hill_formula_without_carbon() {
        let mut summary = MoleculeSummary::default();
        summary.add_element("O", 1);
        summary.add_element("H", 2);
        assert_eq!(summary.formula(), "H2O");
    }
}
