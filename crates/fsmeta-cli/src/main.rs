#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use fsmeta_core::{ClusterRun, EntryReport, FatImage, FileReport, InspectOptions, VolumeReport};
use fsmeta_error::FsmetaError;
use fsmeta_ondisk::{ExfatUtcOffset, FatWidth, RunList, decode_run_list};
use serde::Serialize;
use std::env;
use std::path::Path;

#[derive(Debug, Serialize)]
struct TzOutput {
    raw: String,
    valid: bool,
    increments: i8,
    minutes: i16,
    hours: f64,
    display: String,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        let code = error
            .downcast_ref::<FsmetaError>()
            .map_or(1, FsmetaError::to_errno);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "inspect" => {
            let Some(path) = rest.first().filter(|arg| !arg.starts_with("--")) else {
                bail!("inspect requires an image path");
            };
            let json = rest.iter().any(|arg| arg == "--json");
            let options = InspectOptions {
                include_deleted: !rest.iter().any(|arg| arg == "--hide-deleted"),
                walk_chains: !rest.iter().any(|arg| arg == "--no-chains"),
                fat_width: if rest.iter().any(|arg| arg == "--fat12") {
                    FatWidth::Fat12
                } else {
                    FatWidth::Fat16
                },
            };
            match flag_value(&rest, "--file")? {
                Some(name) => inspect_file(Path::new(path), name, &options, json),
                None => inspect(Path::new(path), &options, json),
            }
        }
        "runs" => {
            let json = rest.iter().any(|arg| arg == "--json");
            let base = match flag_value(&rest, "--base")? {
                Some(raw) => parse_cluster_number(raw)?,
                None => 0,
            };
            let hex_args = positional(&rest, &["--base"]);
            if hex_args.is_empty() {
                bail!("runs requires hex bytes, e.g. `fsmeta runs 21 03 DA 0D 00`");
            }
            let bytes = parse_hex_bytes(&hex_args.join(" "))?;
            runs(&bytes, base, json)
        }
        "tz" => {
            let json = rest.iter().any(|arg| arg == "--json");
            let Some(raw) = positional(&rest, &[]).first().copied() else {
                bail!("tz requires one hex byte, e.g. `fsmeta tz F0`");
            };
            let bytes = parse_hex_bytes(raw)?;
            let [byte] = bytes.as_slice() else {
                bail!("tz takes exactly one byte, got {}", bytes.len());
            };
            tz(*byte, json)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("fsmeta\n");
    println!("USAGE:");
    println!(
        "  fsmeta inspect <image-path> [--json] [--hide-deleted] [--no-chains] [--fat12] [--file <name>]"
    );
    println!("  fsmeta runs <hex bytes...> [--base <cluster>] [--json]");
    println!("  fsmeta tz <hex byte> [--json]");
}

/// Value following `flag`, if the flag is present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|arg| arg == flag) {
        None => Ok(None),
        Some(at) => match args.get(at + 1) {
            Some(value) => Ok(Some(value.as_str())),
            None => bail!("{flag} requires a value"),
        },
    }
}

/// Arguments that are neither `--flags` nor the values of `valued_flags`.
fn positional<'a>(args: &'a [String], valued_flags: &[&str]) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if valued_flags.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if !arg.starts_with("--") {
            out.push(arg.as_str());
        }
    }
    out
}

/// Parse whitespace-separated hex bytes (`21 03 DA`, `0x21 0x03`, or `2103DA`).
fn parse_hex_bytes(input: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in input.split_whitespace() {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        let decoded =
            hex::decode(digits).with_context(|| format!("invalid hex bytes `{token}`"))?;
        bytes.extend_from_slice(&decoded);
    }
    Ok(bytes)
}

/// Parse a cluster number in decimal or `0x` hex.
fn parse_cluster_number(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(digits) => i64::from_str_radix(digits, 16),
        None => trimmed.parse::<i64>(),
    };
    parsed.with_context(|| format!("invalid cluster number `{input}`"))
}

fn inspect(path: &Path, options: &InspectOptions, json: bool) -> Result<()> {
    let image = FatImage::open(path)
        .with_context(|| format!("failed to read FAT12/16 metadata in {}", path.display()))?;
    let report = image.report(options);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(())
}

fn inspect_file(path: &Path, name: &str, options: &InspectOptions, json: bool) -> Result<()> {
    let image = FatImage::open(path)
        .with_context(|| format!("failed to read FAT12/16 metadata in {}", path.display()))?;
    let file = image
        .find(name, options)
        .with_context(|| format!("lookup of `{name}` failed"))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&file).context("serialize entry")?
        );
    } else {
        print_file(&file);
    }
    Ok(())
}

fn print_report(report: &VolumeReport) {
    println!("fsmeta FAT12/16 Inspector\n");
    println!("| Boot Sector | Reserved Area | FAT 1 | FAT 2 | Root Directory | Data Area ->\n");
    for field in &report.boot_fields {
        match field.value {
            Some(value) => println!(
                "{:<22} @0x{:02X} ({}): 0x{} LE = {value}",
                field.name, field.offset, field.width, field.raw_hex
            ),
            None => println!(
                "{:<22} @0x{:02X} ({}): 0x{} = {:?}",
                field.name, field.offset, field.width, field.raw_hex, report.boot_sector.oem_name
            ),
        }
    }

    let geo = &report.geometry;
    println!();
    println!("total_sectors: {}", geo.total_sectors);
    println!("root_dir_sectors: {}", geo.root_dir_sectors);
    println!("boot_sector: 0");
    println!("fat1_start: {}", geo.fat1_start);
    println!("fat2_start: {}", geo.fat2_start);
    println!("root_dir_start: {}", geo.root_dir_start);
    println!("data_start: {}", geo.data_start);
    println!();

    for entry in &report.entries {
        match entry {
            EntryReport::Decoded(file) => print_file(file),
            EntryReport::Failed { slot, error } => {
                println!("slot {slot}: undecodable: {error}\n");
            }
        }
    }
    println!(
        "{} entries, {} long-name slots, {} deleted hidden",
        report.entries.len(),
        report.long_name_slots,
        report.skipped_deleted
    );
}

fn print_file(file: &FileReport) {
    let attrs = &file.attributes;
    println!("name: {} (raw 0x{})", file.name.escape_debug(), file.raw_name);
    println!("created: {} {}", file.created_date, file.created_time);
    println!("accessed: {}", file.access_date);
    println!("modified: {} {}", file.modified_date, file.modified_time);
    println!(
        "attributes: 0x{:02X} directory={} read_only={} hidden={} system={} volume={} archive={}",
        file.raw_attributes,
        attrs.directory,
        attrs.read_only,
        attrs.hidden,
        attrs.system,
        attrs.volume_label,
        attrs.archive
    );
    println!("deleted: {}", file.deleted);
    if !attrs.directory {
        println!("size: {}", file.file_size);
    }
    match &file.clusters {
        ClusterRun::Chain(clusters) => println!("cluster run: {clusters:?}\n"),
        ClusterRun::StartOnly(start) => println!("cluster run: {start}\n"),
        ClusterRun::ZeroByte => println!("cluster run: n/a (zero byte file)\n"),
    }
}

fn runs(bytes: &[u8], base: i64, json: bool) -> Result<()> {
    let list: RunList = decode_run_list(bytes, base).context("failed to decode run list")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&list).context("serialize run list")?
        );
        return Ok(());
    }

    println!("base cluster: {base}");
    for (index, run) in list.runs.iter().enumerate() {
        match run.relative_offset {
            Some(offset) => println!(
                "run {index}: header 0x{:02X}, {} clusters at {} (offset {offset:+})",
                run.header, run.length, run.start_cluster
            ),
            None => println!(
                "run {index}: header 0x{:02X}, {} clusters sparse",
                run.header, run.length
            ),
        }
    }
    println!(
        "{} runs, {} clusters total",
        list.runs.len(),
        list.total_clusters()
    );
    Ok(())
}

fn tz(byte: u8, json: bool) -> Result<()> {
    let offset = ExfatUtcOffset::from_byte(byte);
    let output = TzOutput {
        raw: format!("{byte:02X}"),
        valid: offset.valid,
        increments: offset.increments,
        minutes: offset.minutes(),
        hours: offset.hours(),
        display: offset.to_string(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize offset")?
        );
    } else {
        println!("raw: 0x{}", output.raw);
        println!("valid flag: {}", output.valid);
        println!("15-minute increments: {}", output.increments);
        println!("offset: {} minutes ({} hours)", output.minutes, output.hours);
        println!("{}", output.display);
    }
    Ok(())
}
