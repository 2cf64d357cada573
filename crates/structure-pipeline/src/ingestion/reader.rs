//! Streaming molecule reader over payloads
//!
//! Reads SMILES files (one `SMILES [name]` per line) and SD files (molfile
//! records separated by `$$$$`) lazily, one molecule per iteration. The
//! first stream-level failure is yielded as an error and ends the iteration.

use std::io::BufRead;

use crate::error::{Error, Result};
use crate::types::{Molecule, MoleculeFormat, Payload};

const SD_MIME_TYPES: &[&str] = &["chemical/x-mdl-sdfile", "chemical/x-mdl-molfile"];
const SMILES_MIME_TYPES: &[&str] = &["chemical/x-daylight-smiles"];
const SD_EXTENSIONS: &[&str] = &["sdf", "sd", "mol"];
const SMILES_EXTENSIONS: &[&str] = &["smi", "smiles", "txt"];

const SD_RECORD_END: &str = "$$$$";

/// Pick the molecule format of a payload: mime type first, then the file
/// extension, then SMILES.
pub fn detect_format(payload: &Payload) -> MoleculeFormat {
    let mime = payload.mime_type.to_ascii_lowercase();
    if SD_MIME_TYPES.contains(&mime.as_str()) {
        return MoleculeFormat::Molfile;
    }
    if SMILES_MIME_TYPES.contains(&mime.as_str()) {
        return MoleculeFormat::Smiles;
    }
    match payload.extension() {
        Some(ext) if SD_EXTENSIONS.contains(&ext.as_str()) => MoleculeFormat::Molfile,
        Some(ext) if SMILES_EXTENSIONS.contains(&ext.as_str()) => MoleculeFormat::Smiles,
        _ => MoleculeFormat::Smiles,
    }
}

/// Iterator over the molecules of one payload
pub struct MoleculeReader {
    payload: String,
    format: MoleculeFormat,
    source: Box<dyn BufRead + Send>,
    line_number: usize,
    finished: bool,
}

impl MoleculeReader {
    /// Open a payload and detect its format
    pub fn open(payload: &Payload) -> Result<Self> {
        let source = payload.open()?;
        Ok(Self::new(&payload.name, detect_format(payload), source))
    }

    /// Read molecules of a known format from any buffered source
    pub fn new(
        payload: impl Into<String>,
        format: MoleculeFormat,
        source: Box<dyn BufRead + Send>,
    ) -> Self {
        Self {
            payload: payload.into(),
            format,
            source,
            line_number: 0,
            finished: false,
        }
    }

    pub fn format(&self) -> MoleculeFormat {
        self.format
    }

    fn fail(&mut self, message: String) -> Error {
        self.finished = true;
        Error::stream(&self.payload, message)
    }

    /// Next line without its terminator, `None` at end of stream
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let read = match self.source.read_until(b'\n', &mut buf) {
            Ok(read) => read,
            Err(e) => {
                let line = self.line_number + 1;
                return Err(self.fail(format!("I/O error at line {}: {}", line, e)));
            }
        };
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        let mut line = match String::from_utf8(buf) {
            Ok(line) => line,
            Err(_) => {
                let line = self.line_number;
                return Err(self.fail(format!("invalid UTF-8 at line {}", line)));
            }
        };
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn next_smiles(&mut self) -> Result<Option<Molecule>> {
        while let Some(line) = self.read_line()? {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(2, char::is_whitespace);
            let smiles = fields.next().unwrap_or_default();
            let name = fields.next().map(str::trim).unwrap_or_default();
            return Ok(Some(Molecule::smiles(smiles).with_name(name)));
        }
        Ok(None)
    }

    fn next_sd_record(&mut self) -> Result<Option<Molecule>> {
        let start = self.line_number + 1;
        let mut lines: Vec<String> = Vec::new();
        let mut in_data_block = false;
        let mut terminated = false;

        while let Some(line) = self.read_line()? {
            if line.trim_end() == SD_RECORD_END {
                terminated = true;
                break;
            }
            // Data items after "M  END" are not part of the connection table
            if in_data_block {
                continue;
            }
            if line.starts_with("M  END") {
                in_data_block = true;
            }
            lines.push(line);
        }

        if !terminated && lines.iter().all(|l| l.trim().is_empty()) {
            return Ok(None);
        }

        let has_counts_line = lines
            .get(3)
            .and_then(|l| l.get(0..3))
            .map(|n| n.trim().parse::<u32>().is_ok())
            .unwrap_or(false);
        if !has_counts_line {
            return Err(self.fail(format!("record starting at line {} has no counts line", start)));
        }

        let name = lines[0].trim().to_string();
        Ok(Some(Molecule::molfile(lines.join("\n")).with_name(name)))
    }
}

impl Iterator for MoleculeReader {
    type Item = Result<Molecule>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let next = match self.format {
            MoleculeFormat::Smiles => self.next_smiles(),
            MoleculeFormat::Molfile => self.next_sd_record(),
        };
        match next {
            Ok(Some(molecule)) => Some(Ok(molecule)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::molfile::tests::ETHANOL;
    use std::io::{self, Cursor, Read};

    fn read_all(payload: &Payload) -> Vec<Result<Molecule>> {
        MoleculeReader::open(payload).unwrap().collect()
    }

    #[test]
    fn test_detect_format() {
        let sdf = Payload::from_bytes("lib.SDF", "application/octet-stream", "");
        assert_eq!(detect_format(&sdf), MoleculeFormat::Molfile);

        let by_mime = Payload::from_bytes("lib.bin", "chemical/x-mdl-sdfile", "");
        assert_eq!(detect_format(&by_mime), MoleculeFormat::Molfile);

        let smi = Payload::from_bytes("lib.smi", "", "");
        assert_eq!(detect_format(&smi), MoleculeFormat::Smiles);

        let unknown = Payload::from_bytes("lib", "", "");
        assert_eq!(detect_format(&unknown), MoleculeFormat::Smiles);
    }

    #[test]
    fn test_smiles_lines_with_names_and_comments() {
        let payload = Payload::from_bytes(
            "lib.smi",
            "",
            "# header\nCCO ethanol\n\n  c1ccccc1   benzene ring\r\nO\n",
        );
        let molecules: Vec<Molecule> = read_all(&payload).into_iter().map(|m| m.unwrap()).collect();
        assert_eq!(molecules.len(), 3);
        assert_eq!(molecules[0].data, "CCO");
        assert_eq!(molecules[0].name.as_deref(), Some("ethanol"));
        assert_eq!(molecules[1].data, "c1ccccc1");
        assert_eq!(molecules[1].name.as_deref(), Some("benzene ring"));
        assert!(molecules[2].name.is_none());
    }

    #[test]
    fn test_sd_records() {
        let record = ETHANOL.replace("M  END\n", "M  END\n> <ID>\n42\n\n");
        let text = format!("{}$$$$\n{}$$$$\n", record, ETHANOL.replace("ethanol", "second"));
        let payload = Payload::from_bytes("lib.sdf", "", text);

        let molecules: Vec<Molecule> = read_all(&payload).into_iter().map(|m| m.unwrap()).collect();
        assert_eq!(molecules.len(), 2);
        assert_eq!(molecules[0].format, MoleculeFormat::Molfile);
        assert_eq!(molecules[0].name.as_deref(), Some("ethanol"));
        assert!(molecules[0].data.ends_with("M  END"));
        assert!(!molecules[0].data.contains("<ID>"));
        assert_eq!(molecules[1].name.as_deref(), Some("second"));
    }

    #[test]
    fn test_sd_record_without_counts_line_fails_stream() {
        let text = format!("{}$$$$\nbroken\n\n$$$$\n{}$$$$\n", ETHANOL, ETHANOL);
        let payload = Payload::from_bytes("lib.sdf", "", text);
        let results = read_all(&payload);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Stream { .. })));
    }

    #[test]
    fn test_invalid_utf8_ends_iteration() {
        let mut bytes = b"C\nCC\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"CCC\n");
        let payload = Payload::from_bytes("lib.smi", "", bytes);

        let results = read_all(&payload);
        assert_eq!(results.len(), 3);
        let err = results[2].as_ref().unwrap_err().to_string();
        assert!(err.contains("lib.smi"));
        assert!(err.contains("line 3"));
    }

    struct BrokenSource {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for BrokenSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inner.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "disk gone")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn test_io_error_is_stream_error() {
        let source = io::BufReader::new(BrokenSource {
            inner: Cursor::new(b"C\n".to_vec()),
        });
        let mut reader = MoleculeReader::new("lib.smi", MoleculeFormat::Smiles, Box::new(source));
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(reader.next(), Some(Err(Error::Stream { .. }))));
        assert!(reader.next().is_none());
    }
}
