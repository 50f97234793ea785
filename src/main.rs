//! Operator CLI for the preset codec.
//!
//! Encodes JSON parameter files into preset files, decodes captures back to
//! JSON, and drives the offset discovery workflow against descriptor tables
//! on disk.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use patchcodec::discovery::{report, DiffOptions, DiscoverySession, Promotion};
use patchcodec::registry::DescriptorTable;
use patchcodec::template::loader;
use patchcodec::{
    ByteOrder, Codec, CodecConfig, CodecWarning, Encoding, FormatCatalog, ParamValue,
    ParameterRegistry, SemanticPreset, ValueRange,
};

#[derive(Parser)]
#[command(name = "patchcodec")]
#[command(version, about = "Encode, decode and map binary synthesizer presets")]
struct Cli {
    /// Descriptor directory (JSON tables and templates); built-in formats when absent
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known formats
    Formats,

    /// Write a built-in format's descriptor table and template to a directory
    Export {
        /// Format identifier
        #[arg(short, long)]
        format: String,
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Encode a JSON parameter file into a preset file
    Encode {
        /// Format identifier
        #[arg(short, long)]
        format: String,
        /// JSON object of parameter values
        #[arg(short, long)]
        params: PathBuf,
        /// Output preset file
        #[arg(short, long)]
        out: PathBuf,
        /// Template variant to encode onto
        #[arg(long)]
        variant: Option<String>,
        /// Codec configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Clamp out-of-range values instead of failing
        #[arg(long)]
        clamp: bool,
        /// Fail on parameters without a descriptor
        #[arg(long)]
        strict: bool,
    },

    /// Decode a preset file to JSON
    Decode {
        /// Preset file
        file: PathBuf,
        /// Format identifier; sniffed from the file when absent
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Diff two captures that differ in one control
    Diff {
        /// Baseline capture
        a: PathBuf,
        /// Capture with the control varied
        b: PathBuf,
        /// Independent captures of the same control at other values
        #[arg(long)]
        confirm: Vec<PathBuf>,
        /// Merge runs separated by at most this many equal bytes
        #[arg(long, default_value_t = 0)]
        merge_gap: usize,
        /// Byte order used for guesses
        #[arg(long, default_value_t = ByteOrder::Little)]
        byte_order: ByteOrder,
        /// Write the candidates as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Promote a confirmed candidate into a descriptor table on disk
    Promote {
        /// Baseline capture
        a: PathBuf,
        /// Capture with the control varied
        b: PathBuf,
        /// Independent confirmation captures
        #[arg(long, required = true)]
        confirm: Vec<PathBuf>,
        /// Format whose table receives the field
        #[arg(short, long)]
        format: String,
        /// Candidate index as printed by `diff`
        #[arg(long)]
        index: usize,
        /// Parameter name
        #[arg(long)]
        name: String,
        /// Accepted range as `min,max`
        #[arg(long, allow_hyphen_values = true)]
        range: ValueRange,
        /// Default value
        #[arg(long, allow_hyphen_values = true)]
        default: ParamValue,
        /// Encoding override (`uint`, `int`, `float`, `fixed:<scale>`, `flag:<mask>`)
        #[arg(long)]
        encoding: Option<Encoding>,
        /// Byte order; taken from the table's existing fields when absent
        #[arg(long)]
        byte_order: Option<ByteOrder>,
        /// Merge runs separated by at most this many equal bytes
        #[arg(long, default_value_t = 0)]
        merge_gap: usize,
    },
}

#[derive(Serialize)]
struct DecodeReport<'a> {
    format: &'a str,
    length: usize,
    values: &'a SemanticPreset,
    residuals: BTreeMap<usize, String>,
    warnings: &'a [CodecWarning],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = cli.dir.as_deref();
    match cli.command {
        Command::Formats => list_formats(dir),
        Command::Export { format, out } => export(&format, &out),
        Command::Encode {
            format,
            params,
            out,
            variant,
            config,
            clamp,
            strict,
        } => {
            let mut config = match config {
                Some(path) => CodecConfig::load(&path)
                    .with_context(|| format!("Failed to read config '{}'", path.display()))?,
                None => CodecConfig::default(),
            };
            if clamp {
                config = config.clamping();
            }
            if strict {
                config = config.strict();
            }
            encode(dir, &format, &params, &out, variant.as_deref(), config)
        }
        Command::Decode { file, format } => decode(dir, &file, format.as_deref()),
        Command::Diff {
            a,
            b,
            confirm,
            merge_gap,
            byte_order,
            csv,
        } => {
            let captures = Captures {
                a,
                b,
                confirm,
                options: DiffOptions { merge_gap },
            };
            let session = captures.open(byte_order)?;
            for (index, candidate) in session.candidates().iter().enumerate() {
                println!("#{index:<3} {candidate}");
            }
            if session.candidates().is_empty() {
                println!("captures are identical");
            }
            if let Some(path) = csv {
                let file = fs::File::create(&path)
                    .with_context(|| format!("Failed to create '{}'", path.display()))?;
                report::write_csv(session.candidates(), file)?;
                println!("wrote {}", path.display());
            }
            Ok(())
        }
        Command::Promote {
            a,
            b,
            confirm,
            format,
            index,
            name,
            range,
            default,
            encoding,
            byte_order,
            merge_gap,
        } => {
            let Some(dir) = dir else {
                bail!("promote needs --dir pointing at the descriptor tables");
            };
            let mut promotion = Promotion::new(name, range, default);
            promotion.encoding = encoding;
            let captures = Captures {
                a,
                b,
                confirm,
                options: DiffOptions { merge_gap },
            };
            promote(dir, &format, &captures, index, promotion, byte_order)
        }
    }
}

fn load_catalog(dir: Option<&Path>) -> Result<FormatCatalog> {
    match dir {
        Some(dir) => FormatCatalog::load_dir(dir)
            .with_context(|| format!("Failed to load descriptor tables from '{}'", dir.display())),
        None => Ok(FormatCatalog::builtin()?),
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn list_formats(dir: Option<&Path>) -> Result<()> {
    let catalog = load_catalog(dir)?;
    println!("{:<8} {:<28} {:>8} {:>7}  variants", "id", "name", "template", "fields");
    for format in catalog.iter() {
        println!(
            "{:<8} {:<28} {:>8} {:>7}  {}",
            format.id(),
            format.name(),
            format.template().len(),
            format.registry().len(),
            catalog.templates().variants(format.id()).join(",")
        );
    }
    Ok(())
}

fn export(format_id: &str, out: &Path) -> Result<()> {
    let catalog = FormatCatalog::builtin()?;
    let format = catalog.get(format_id)?;
    fs::create_dir_all(out).with_context(|| format!("Failed to create '{}'", out.display()))?;

    let template_name = format!("{}.{}", format.id(), format.adapter().extension());
    fs::write(out.join(&template_name), format.template())?;
    let table = DescriptorTable::from_registry(format.id(), &template_name, format.registry());
    let table_path = out.join(format!("{}.json", format.id()));
    table.save(&table_path)?;

    println!(
        "exported {} fields and {} to {}",
        format.registry().len(),
        template_name,
        out.display()
    );
    Ok(())
}

fn encode(
    dir: Option<&Path>,
    format_id: &str,
    params: &Path,
    out: &Path,
    variant: Option<&str>,
    config: CodecConfig,
) -> Result<()> {
    let text = fs::read_to_string(params)
        .with_context(|| format!("Failed to read '{}'", params.display()))?;
    let preset = SemanticPreset::from_json(&text)
        .with_context(|| format!("'{}' is not a JSON object of parameters", params.display()))?;

    let codec = Codec::new(load_catalog(dir)?, config);
    let encoded = match variant {
        Some(variant) => codec.encode_variant(format_id, variant, &preset)?,
        None => codec.encode(format_id, &preset)?,
    };
    fs::write(out, encoded.blob.as_bytes())
        .with_context(|| format!("Failed to write '{}'", out.display()))?;

    println!(
        "wrote {} bytes to {} ({} warnings)",
        encoded.blob.len(),
        out.display(),
        encoded.warnings.len()
    );
    Ok(())
}

fn decode(dir: Option<&Path>, file: &Path, format_id: Option<&str>) -> Result<()> {
    let data = read(file)?;
    let codec = Codec::new(load_catalog(dir)?, CodecConfig::default());
    let decoded = match format_id {
        Some(id) => codec.decode(id, &data)?,
        None => codec.decode_auto(&data)?,
    };

    let report = DecodeReport {
        format: &decoded.format_id,
        length: decoded.length,
        values: &decoded.values,
        residuals: decoded
            .residuals
            .iter()
            .map(|(offset, bytes)| (offset, hex::encode(bytes)))
            .collect(),
        warnings: &decoded.warnings,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Capture files of one discovery comparison
struct Captures {
    a: PathBuf,
    b: PathBuf,
    confirm: Vec<PathBuf>,
    options: DiffOptions,
}

impl Captures {
    fn open(&self, byte_order: ByteOrder) -> Result<DiscoverySession> {
        let mut session =
            DiscoverySession::new(read(&self.a)?, &read(&self.b)?, self.options, byte_order)
                .with_context(|| {
                    format!(
                        "Cannot compare '{}' and '{}'",
                        self.a.display(),
                        self.b.display()
                    )
                })?;
        for path in &self.confirm {
            session
                .confirm(&read(path)?)
                .with_context(|| format!("Cannot confirm with '{}'", path.display()))?;
        }
        Ok(session)
    }
}

fn promote(
    dir: &Path,
    format_id: &str,
    captures: &Captures,
    index: usize,
    promotion: Promotion,
    byte_order: Option<ByteOrder>,
) -> Result<()> {
    let mut found = None;
    for path in loader::table_paths(dir)? {
        let table = DescriptorTable::load(&path)?;
        if table.format == format_id {
            found = Some((path, table));
            break;
        }
    }
    let Some((table_path, mut table)) = found else {
        bail!("no descriptor table for '{format_id}' in '{}'", dir.display());
    };

    let template = loader::read_template(dir, &table.template)?;
    let byte_order = byte_order
        .or_else(|| table.fields.first().map(|field| field.byte_order))
        .unwrap_or_default();
    let session = captures.open(byte_order)?;

    let registry = ParameterRegistry::new(table.fields.clone(), template.len())?.into_shared();
    let field = session.promote(index, &registry, promotion)?;
    table.fields = registry.read().all().to_vec();
    table.save(&table_path)?;

    println!(
        "added '{}' at offset {} ({} bytes, {}) to {}",
        field.name,
        field.offset,
        field.width,
        field.encoding,
        table_path.display()
    );
    Ok(())
}
