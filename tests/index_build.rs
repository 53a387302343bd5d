//! End-to-end tests of the SBS context index over a small synthetic genome
//!
//! The genome is built by splicing target trinucleotides into poly-A
//! chromosomes at fixed positions, so the exact occurrence set of every
//! probed context is known. A naive scan over the constructed sequences
//! double-checks the construction before the index is interrogated.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use ctxindex::genome::{GenomicPosition, GenomicRegion};
use ctxindex::progress::NoProgress;
use ctxindex::sbs::{SbsContext, SbsContextIndex, SbsIndexOptions};

fn splice(sequence: &mut [u8], position: usize, motif: &[u8]) {
    sequence[position - 1..position - 1 + motif.len()].copy_from_slice(motif);
}

fn chromosome_1() -> Vec<u8> {
    let mut sequence = vec![b'A'; 120];
    for position in [7, 13, 19, 25, 37, 66, 87] {
        splice(&mut sequence, position, b"CCT");
    }
    splice(&mut sequence, 30, b"GCG");
    splice(&mut sequence, 61, b"TCT");
    splice(&mut sequence, 76, b"ACT");
    splice(&mut sequence, 81, b"GCTCC");
    splice(&mut sequence, 107, b"TCT");
    sequence
}

fn chromosome_2() -> Vec<u8> {
    let mut sequence = vec![b'A'; 300];
    splice(&mut sequence, 125, b"TCGCT");
    splice(&mut sequence, 152, b"CCT");
    splice(&mut sequence, 163, b"TCTCT");
    splice(&mut sequence, 170, b"GCT");
    splice(&mut sequence, 263, b"ACT");
    splice(&mut sequence, 293, b"GCTCC");
    sequence
}

fn chromosome_3() -> Vec<u8> {
    let mut sequence = vec![b'A'; 20];
    splice(&mut sequence, 5, b"ACTGCG");
    sequence
}

fn test_genome() -> Vec<(u8, Vec<u8>)> {
    vec![(1, chromosome_1()), (2, chromosome_2()), (3, chromosome_3())]
}

/// The expected occurrence sets of the probed contexts
fn expected_positions() -> BTreeMap<&'static str, BTreeSet<(u8, u32)>> {
    let mut expected = BTreeMap::new();
    expected.insert("ACT", BTreeSet::from([(1, 76), (2, 263), (3, 5)]));
    expected.insert("GCG", BTreeSet::from([(1, 30), (3, 8)]));
    expected.insert("TCC", BTreeSet::from([(1, 83), (2, 295)]));
    expected.insert(
        "TCT",
        BTreeSet::from([(1, 61), (1, 107), (2, 163), (2, 165)]),
    );
    expected.insert(
        "GCT",
        BTreeSet::from([(1, 81), (2, 127), (2, 170), (2, 293)]),
    );
    expected.insert("TCG", BTreeSet::from([(2, 125)]));
    expected
}

/// Every occurrence of `motif` in the genome, by direct string scanning
fn naive_positions(genome: &[(u8, Vec<u8>)], motif: &[u8]) -> BTreeSet<(u8, u32)> {
    let mut positions = BTreeSet::new();
    for (chr_id, sequence) in genome {
        for start in 0..sequence.len().saturating_sub(motif.len() - 1) {
            if &sequence[start..start + motif.len()] == motif {
                positions.insert((*chr_id, (start + 1) as u32));
            }
        }
    }
    positions
}

fn write_fasta(path: &Path, genome: &[(u8, Vec<u8>)]) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    for (chr_id, sequence) in genome {
        writeln!(file, ">chr{chr_id} synthetic")?;
        for line in sequence.chunks(60) {
            file.write_all(line)?;
            writeln!(file)?;
        }
    }
    // an unplaced scaffold the scan must skip
    writeln!(file, ">GL000008.2 unplaced")?;
    writeln!(file, "ACTACTACTACT")?;
    Ok(())
}

fn bucket_positions(
    index: &SbsContextIndex,
    context: &SbsContext,
) -> Result<BTreeSet<(u8, u32)>> {
    let mut positions = BTreeSet::new();
    for value in index.bucket(context)?.iter()? {
        let value = value?;
        positions.insert((value.chr_id, value.position));
    }
    Ok(positions)
}

fn build_options(dir: &Path) -> SbsIndexOptions {
    SbsIndexOptions::default().cache_size(100_000).tmp_dir(dir)
}

#[test]
fn the_synthetic_genome_matches_its_blueprint() {
    // guard the construction itself: the spliced motifs must occur exactly
    // at the blueprint positions and nowhere else
    let genome = test_genome();
    for (context, positions) in expected_positions() {
        assert_eq!(
            naive_positions(&genome, context.as_bytes()),
            positions,
            "occurrences of {context} drifted from the blueprint"
        );
    }
    assert_eq!(
        naive_positions(&genome, b"CCT"),
        BTreeSet::from([
            (1, 7),
            (1, 13),
            (1, 19),
            (1, 25),
            (1, 37),
            (1, 66),
            (1, 87),
            (2, 152)
        ])
    );
}

#[test]
fn whole_genome_index_maps_every_context_occurrence() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let fasta_path = dir.path().join("genome.fa");
    let genome = test_genome();
    write_fasta(&fasta_path, &genome)?;

    let mut rng = SmallRng::seed_from_u64(0);
    let index: SbsContextIndex = SbsContextIndex::build(
        &mut rng,
        dir.path().join("index"),
        &fasta_path,
        &build_options(dir.path()),
        &mut NoProgress,
    )?;

    for (context, positions) in expected_positions() {
        let context: SbsContext = context.parse()?;
        assert_eq!(
            bucket_positions(&index, &context)?,
            positions,
            "context {context}"
        );
    }

    assert_eq!(
        index.chromosome_lengths(),
        &BTreeMap::from([(1u8, 120u64), (2, 300), (3, 20)])
    );
    Ok(())
}

#[test]
fn avoided_regions_drop_their_positions() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let fasta_path = dir.path().join("genome.fa");
    write_fasta(&fasta_path, &test_genome())?;

    let regions = BTreeSet::from([
        GenomicRegion::new(GenomicPosition::new(2, 115), 20),
        GenomicRegion::new(GenomicPosition::new(1, 5), 73),
        GenomicRegion::new(GenomicPosition::new(2, 247), 11),
    ]);

    let mut rng = SmallRng::seed_from_u64(0);
    let index: SbsContextIndex = SbsContextIndex::build(
        &mut rng,
        dir.path().join("index"),
        &fasta_path,
        &build_options(dir.path()).regions_to_avoid(regions.clone()),
        &mut NoProgress,
    )?;

    for (context, positions) in expected_positions() {
        let survivors: BTreeSet<(u8, u32)> = positions
            .into_iter()
            .filter(|&(chr_id, position)| {
                !regions
                    .iter()
                    .any(|region| region.contains(&GenomicPosition::new(chr_id, position)))
            })
            .collect();
        let context: SbsContext = context.parse()?;
        if survivors.is_empty() {
            // every occurrence was masked out: the key has no bucket
            assert!(index.bucket(&context).is_err(), "context {context}");
        } else {
            assert_eq!(
                bucket_positions(&index, &context)?,
                survivors,
                "context {context}"
            );
        }
    }
    Ok(())
}

#[test]
fn context_bucket_holds_the_expected_multiset() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let fasta_path = dir.path().join("genome.fa");
    write_fasta(&fasta_path, &test_genome())?;

    let mut rng = SmallRng::seed_from_u64(0);
    let index: SbsContextIndex = SbsContextIndex::build(
        &mut rng,
        dir.path().join("index"),
        &fasta_path,
        &build_options(dir.path()),
        &mut NoProgress,
    )?;

    let cct: SbsContext = "CCT".parse()?;
    let bucket = index.bucket(&cct)?;
    assert_eq!(bucket.len(), 8);

    let expected = BTreeSet::from([
        (1u8, 7u32),
        (1, 13),
        (1, 19),
        (1, 25),
        (1, 37),
        (1, 66),
        (1, 87),
        (2, 152),
    ]);
    assert_eq!(bucket_positions(&index, &cct)?, expected);

    // ordinal access sees the same multiset, in some shuffled order
    let mut by_ordinal = BTreeSet::new();
    for i in 0..bucket.len() {
        let value = bucket.get(i)?;
        by_ordinal.insert((value.chr_id, value.position));
    }
    assert_eq!(by_ordinal, expected);
    Ok(())
}

#[test]
fn reopened_index_agrees_with_the_built_one() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let fasta_path = dir.path().join("genome.fa");
    write_fasta(&fasta_path, &test_genome())?;

    let mut rng = SmallRng::seed_from_u64(0);
    let index_dir = dir.path().join("index");
    let built: SbsContextIndex = SbsContextIndex::build(
        &mut rng,
        &index_dir,
        &fasta_path,
        &build_options(dir.path()),
        &mut NoProgress,
    )?;

    let reopened: SbsContextIndex = SbsContextIndex::open(&index_dir, 100_000)?;
    assert_eq!(built.keys(), reopened.keys());
    for key in built.keys() {
        assert_eq!(built.num_of_values(&key), reopened.num_of_values(&key));
    }
    assert_eq!(built.chromosome_lengths(), reopened.chromosome_lengths());
    Ok(())
}

#[test]
fn class_extraction_drains_context_and_reverse_complement() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let fasta_path = dir.path().join("genome.fa");
    write_fasta(&fasta_path, &test_genome())?;

    let mut rng = SmallRng::seed_from_u64(0);
    let mut index: SbsContextIndex = SbsContextIndex::build(
        &mut rng,
        dir.path().join("index"),
        &fasta_path,
        &build_options(dir.path()),
        &mut NoProgress,
    )?;
    index.boot_up_tours(&mut rng, &mut NoProgress)?;

    // ACT pools with AGT, which the blueprint never places
    let act: SbsContext = "ACT".parse()?;
    assert_eq!(index.num_of_class_values(&act), 3);
    assert_eq!(index.extractable_from_class(&act), 3);

    // a with-replacement draw leaves the extractable counts untouched
    let (_, position) = index.choose_from_class(&mut rng, &act)?;
    assert!([(1, 76), (2, 263), (3, 5)].contains(&(position.chr_id, position.position as u32)));
    assert_eq!(index.extractable_from_class(&act), 3);

    let mut drawn = BTreeSet::new();
    for _ in 0..3 {
        let (key, position) = index.extract_from_class(&mut rng, &act)?;
        assert_eq!(key, act);
        drawn.insert((position.chr_id, position.position));
    }
    assert_eq!(drawn, BTreeSet::from([(1, 76), (2, 263), (3, 5)]));

    assert_eq!(index.extractable_from_class(&act), 0);
    assert!(index.extract_from_class(&mut rng, &act).is_err());

    index.reset();
    assert_eq!(index.extractable_from_class(&act), 3);
    Ok(())
}
