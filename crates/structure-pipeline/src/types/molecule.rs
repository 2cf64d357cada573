//! Raw molecule representations as read from payloads or submitted as text

use serde::{Deserialize, Serialize};

/// Supported molecule encodings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MoleculeFormat {
    /// Daylight SMILES string
    Smiles,
    /// MDL molfile (V2000 connection table)
    Molfile,
}

impl MoleculeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smiles => "smiles",
            Self::Molfile => "molfile",
        }
    }
}

/// A molecule before normalization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Molecule {
    /// Name from the source file, if any
    pub name: Option<String>,
    /// Encoding of `data`
    pub format: MoleculeFormat,
    /// Raw text of the molecule
    pub data: String,
}

impl Molecule {
    /// Create a SMILES molecule
    pub fn smiles(data: impl Into<String>) -> Self {
        Self {
            name: None,
            format: MoleculeFormat::Smiles,
            data: data.into(),
        }
    }

    /// Create a molfile molecule
    pub fn molfile(data: impl Into<String>) -> Self {
        Self {
            name: None,
            format: MoleculeFormat::Molfile,
            data: data.into(),
        }
    }

    /// Attach a name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.trim().is_empty() { None } else { Some(name) };
        self
    }

    /// Wrap free text, sniffing the format.
    ///
    /// Multi-line text or text carrying an `M  END` terminator is treated as a
    /// molfile; anything else is a SMILES string. No validation happens here.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim_end();
        if trimmed.contains("M  END") || trimmed.trim_start().lines().count() > 1 {
            let name = trimmed.lines().next().map(str::trim).unwrap_or_default().to_string();
            Self::molfile(trimmed).with_name(name)
        } else {
            Self::smiles(trimmed.trim())
        }
    }

    /// Display name, falling back to the raw data
    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => match self.format {
                MoleculeFormat::Smiles => &self.data,
                MoleculeFormat::Molfile => "",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_text_smiles() {
        let mol = Molecule::from_text("  CCO \n");
        assert_eq!(mol.format, MoleculeFormat::Smiles);
        assert_eq!(mol.data, "CCO");
        assert_eq!(mol.display_name(), "CCO");
    }

    #[test]
    fn test_from_text_molfile() {
        let text = "ethanol\n  test\n\n  3  2  0  0  0  0  0  0  0  0999 V2000\nM  END\n";
        let mol = Molecule::from_text(text);
        assert_eq!(mol.format, MoleculeFormat::Molfile);
        assert_eq!(mol.name.as_deref(), Some("ethanol"));
    }

    #[test]
    fn test_blank_name_is_none() {
        let mol = Molecule::smiles("C").with_name("   ");
        assert!(mol.name.is_none());
    }
}
