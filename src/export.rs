use std::fs::File;
use std::io::Write;

use camino::Utf8Path;

use crate::domain::VariantRecord;
use crate::error::SnvError;

/// Fixed column set of the variant table. Downstream tooling matches on
/// these names, so they must not change.
pub const VARIANT_COLUMNS: [&str; 7] = [
    "chr",
    "start",
    "end",
    "ref",
    "alt",
    "uniprot",
    "protein_change",
];

pub fn write_variants(path: &Utf8Path, variants: &[VariantRecord]) -> Result<(), SnvError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
    }
    let file = File::create(path.as_std_path())
        .map_err(|err| SnvError::Filesystem(err.to_string()))?;
    write_variants_to(file, variants)
}

pub fn write_variants_to<W: Write>(writer: W, variants: &[VariantRecord]) -> Result<(), SnvError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(VARIANT_COLUMNS)
        .map_err(|err| SnvError::Csv(err.to_string()))?;
    for variant in variants {
        csv_writer
            .write_record([
                variant.chromosome.as_str(),
                &variant.start.to_string(),
                &variant.end.to_string(),
                &variant.ref_base.to_string(),
                &variant.alt_base.to_string(),
                variant.protein_id.as_str(),
                variant.protein_change.as_str(),
            ])
            .map_err(|err| SnvError::Csv(err.to_string()))?;
    }
    csv_writer
        .flush()
        .map_err(|err| SnvError::Csv(err.to_string()))?;
    Ok(())
}
