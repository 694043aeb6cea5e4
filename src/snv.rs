use crate::domain::{CODON_LENGTH, VariantRecord};

pub const STOP_AA: char = '*';

/// Codon alphabet, in the fixed order alternates are tried.
pub const BASES: [char; 4] = ['a', 'c', 'g', 't'];

/// Standard genetic code. Unknown codons (ambiguity codes and the like)
/// translate to `None` and are skipped by the enumerator.
pub fn translate(codon: &str) -> Option<char> {
    let normalized = codon.to_ascii_lowercase();
    Some(match normalized.as_str() {
        "ttt" | "ttc" => 'F',
        "tta" | "ttg" | "ctt" | "ctc" | "cta" | "ctg" => 'L',
        "att" | "atc" | "ata" => 'I',
        "atg" => 'M',
        "gtt" | "gtc" | "gta" | "gtg" => 'V',
        "tct" | "tcc" | "tca" | "tcg" | "agt" | "agc" => 'S',
        "cct" | "ccc" | "cca" | "ccg" => 'P',
        "act" | "acc" | "aca" | "acg" => 'T',
        "gct" | "gcc" | "gca" | "gcg" => 'A',
        "tat" | "tac" => 'Y',
        "taa" | "tag" | "tga" => STOP_AA,
        "cat" | "cac" => 'H',
        "caa" | "cag" => 'Q',
        "aat" | "aac" => 'N',
        "aaa" | "aag" => 'K',
        "gat" | "gac" => 'D',
        "gaa" | "gag" => 'E',
        "tgt" | "tgc" => 'C',
        "tgg" => 'W',
        "cgt" | "cgc" | "cga" | "cgg" | "aga" | "agg" => 'R',
        "ggt" | "ggc" | "gga" | "ggg" => 'G',
        _ => return None,
    })
}

/// Which substitution classes to drop. Both filters are on by default,
/// matching the reference tool; nonsense exclusion in particular is a
/// judgment call, so it stays independently switchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnvFilter {
    pub exclude_synonymous: bool,
    pub exclude_nonsense: bool,
}

impl Default for SnvFilter {
    fn default() -> Self {
        Self {
            exclude_synonymous: true,
            exclude_nonsense: true,
        }
    }
}

impl SnvFilter {
    fn admits(&self, ref_aa: char, alt_aa: char) -> bool {
        if self.exclude_synonymous && alt_aa == ref_aa {
            return false;
        }
        if self.exclude_nonsense && alt_aa == STOP_AA {
            return false;
        }
        true
    }
}

/// Walks a coding sequence codon by codon and emits every single-base
/// substitution admitted by the filter. The trailing stop codon and any
/// incomplete tail codon are ignored. Positions are zero-based nucleotide
/// offsets from the start of the trimmed sequence; the enumeration order is
/// deterministic (codon, then offset, then alternate base).
pub fn enumerate_snvs(
    na_seq: &str,
    protein_id: &str,
    chromosome: Option<&str>,
    filter: SnvFilter,
) -> Vec<VariantRecord> {
    let mut variants = Vec::new();
    let bytes = na_seq.as_bytes();
    if bytes.len() < 2 * CODON_LENGTH {
        return variants;
    }
    let coding = &bytes[..bytes.len() - CODON_LENGTH];
    let chromosome = chromosome.unwrap_or("-");

    let codons = coding.chunks_exact(CODON_LENGTH);
    for (codon_index, codon) in codons.enumerate() {
        let codon = String::from_utf8_lossy(codon).to_ascii_lowercase();
        let Some(ref_aa) = translate(&codon) else {
            continue;
        };
        for (offset, ref_base) in codon.chars().enumerate() {
            let position = CODON_LENGTH * codon_index + offset;
            for alt_base in BASES {
                if alt_base == ref_base {
                    continue;
                }
                let mut alt_codon = codon.clone();
                alt_codon.replace_range(offset..offset + 1, &alt_base.to_string());
                let Some(alt_aa) = translate(&alt_codon) else {
                    continue;
                };
                if !filter.admits(ref_aa, alt_aa) {
                    continue;
                }
                variants.push(VariantRecord {
                    chromosome: chromosome.to_string(),
                    start: position,
                    end: position,
                    ref_base,
                    alt_base,
                    protein_id: protein_id.to_string(),
                    protein_change: format!("{ref_aa}{position}{alt_aa}"),
                });
            }
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genetic_code_is_total_over_valid_codons() {
        let mut stops = 0;
        for a in BASES {
            for b in BASES {
                for c in BASES {
                    let codon = format!("{a}{b}{c}");
                    let aa = translate(&codon).unwrap();
                    if aa == STOP_AA {
                        stops += 1;
                    }
                }
            }
        }
        assert_eq!(stops, 3);
        assert_eq!(translate("NNN"), None);
        assert_eq!(translate("ATG"), Some('M'));
    }

    #[test]
    fn atg_scenario() {
        // atg + taa stop; only the met codon is enumerated.
        let variants = enumerate_snvs("atgtaa", "P04637", None, SnvFilter::default());

        let gtg = variants
            .iter()
            .find(|v| v.start == 0 && v.alt_base == 'g')
            .unwrap();
        assert_eq!(gtg.ref_base, 'a');
        assert_eq!(gtg.protein_change, "M0V");

        let ata = variants
            .iter()
            .find(|v| v.start == 2 && v.alt_base == 'a')
            .unwrap();
        assert_eq!(ata.ref_base, 'g');
        assert_eq!(ata.protein_change, "M2I");

        // atg has no synonymous codon and no single-base path to a stop
        // except none; every emitted row changes the amino acid.
        assert!(variants.iter().all(|v| !v.protein_change.ends_with('*')));
    }

    #[test]
    fn nonsense_rows_are_excluded_by_default() {
        // tgg (Trp): tga and tag are single-base stops.
        let variants = enumerate_snvs("tggtaa", "X", None, SnvFilter::default());
        assert!(variants.iter().all(|v| !v.protein_change.ends_with('*')));

        let keep_nonsense = enumerate_snvs(
            "tggtaa",
            "X",
            None,
            SnvFilter {
                exclude_synonymous: true,
                exclude_nonsense: false,
            },
        );
        assert!(keep_nonsense.len() > variants.len());
        assert!(
            keep_nonsense
                .iter()
                .any(|v| v.protein_change.ends_with(STOP_AA))
        );
    }

    #[test]
    fn synonymous_rows_can_be_kept() {
        // ctt (Leu): ctc/cta/ctg are synonymous third-position changes.
        let strict = enumerate_snvs("ctttaa", "X", None, SnvFilter::default());
        let relaxed = enumerate_snvs(
            "ctttaa",
            "X",
            None,
            SnvFilter {
                exclude_synonymous: false,
                exclude_nonsense: true,
            },
        );
        assert_eq!(relaxed.len(), strict.len() + 3);
    }

    #[test]
    fn stop_only_and_short_sequences_yield_nothing() {
        assert!(enumerate_snvs("taa", "X", None, SnvFilter::default()).is_empty());
        assert!(enumerate_snvs("at", "X", None, SnvFilter::default()).is_empty());
        assert!(enumerate_snvs("", "X", None, SnvFilter::default()).is_empty());
    }

    #[test]
    fn incomplete_tail_codon_is_dropped() {
        // After trimming the stop codon, two leftover bases remain.
        let with_tail = enumerate_snvs("atggataa", "X", None, SnvFilter::default());
        let clean = enumerate_snvs("atgtaa", "X", None, SnvFilter::default());
        assert_eq!(with_tail, clean);
    }

    #[test]
    fn enumeration_is_deterministic() {
        let seq = "atgcgtacctggtaa";
        let first = enumerate_snvs(seq, "X", None, SnvFilter::default());
        let second = enumerate_snvs(seq, "X", None, SnvFilter::default());
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_by_key(|v| (v.start, v.alt_base));
        // already ordered by codon, offset, then alternate base
        assert_eq!(first, sorted);
    }

    #[test]
    fn multibyte_input_is_ignored_without_panic() {
        // Trimming three bytes off "atgλaa" lands inside the two-byte λ;
        // the partial character must be dropped, not panic.
        let odd = enumerate_snvs("atgλaa", "X", None, SnvFilter::default());
        let clean = enumerate_snvs("atgtaa", "X", None, SnvFilter::default());
        assert_eq!(odd, clean);
    }

    #[test]
    fn unknown_codons_are_skipped() {
        let variants = enumerate_snvs("annatgtaa", "X", None, SnvFilter::default());
        let met_only = enumerate_snvs("atgtaa", "X", None, SnvFilter::default());
        assert_eq!(variants.len(), met_only.len());
        assert!(variants.iter().all(|v| v.start >= 3));
    }
}
