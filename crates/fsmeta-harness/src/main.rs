#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use fsmeta_core::InspectOptions;
use fsmeta_harness::{
    extract_fat_metadata, extract_region, validate_fat_fixture, validate_run_list_cases,
};
use fsmeta_ondisk::FatWidth;
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("check-fixtures") => check_fixtures(),
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn print_usage() {
    println!("fsmeta-harness\n");
    println!("USAGE:");
    println!("  fsmeta-harness check-fixtures");
    println!("  fsmeta-harness generate-fixture <image> [fat-metadata|region <offset> <len>]");
}

fn check_fixtures() -> Result<()> {
    let fat16 = validate_fat_fixture(
        Path::new("conformance/fixtures/fat16_volume.json"),
        &InspectOptions::default(),
    )?;
    let fat12 = validate_fat_fixture(
        Path::new("conformance/fixtures/fat12_volume.json"),
        &InspectOptions {
            fat_width: FatWidth::Fat12,
            ..InspectOptions::default()
        },
    )?;
    let runs = validate_run_list_cases(Path::new("conformance/fixtures/ntfs_run_lists.json"))?;

    println!(
        "fat16: oem={} data_start={} entries={}",
        fat16.boot_sector.oem_name,
        fat16.geometry.data_start,
        fat16.entries.len()
    );
    println!(
        "fat12: oem={} data_start={} entries={}",
        fat12.boot_sector.oem_name,
        fat12.geometry.data_start,
        fat12.entries.len()
    );
    println!("ntfs run lists: {runs} cases ok");
    Ok(())
}

fn generate_fixture(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: fsmeta-harness generate-fixture <image> [fat-metadata|region <offset> <len>]");
    }

    let image_path = Path::new(&args[0]);
    let image_data =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let kind = args.get(1).map_or("fat-metadata", String::as_str);
    let fixture = match kind {
        "fat-metadata" => extract_fat_metadata(&image_data)?,
        "region" => {
            let offset: usize = args
                .get(2)
                .context("region requires <offset>")?
                .parse()
                .context("invalid offset")?;
            let len: usize = args
                .get(3)
                .context("region requires <len>")?
                .parse()
                .context("invalid len")?;
            extract_region(&image_data, offset, len)?
        }
        _ => bail!("unknown fixture kind: {kind}"),
    };

    println!("{}", serde_json::to_string_pretty(&fixture)?);
    Ok(())
}
