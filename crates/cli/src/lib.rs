use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use planmark_core::links::LinkEvent;
use planmark_pdf::{export_to_pdf, read_info, ExportOptions};
use planmark_storage::{load_project, LoadedProject};
use std::ffi::OsString;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "planmark-cli")]
#[command(about = "Planmark takeoff CLI")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Bake a project's markups into output PDFs.
    Export {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
        /// Directory for the baked documents; defaults to the project's
        /// directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Leave out markups still pending AI confirmation.
        #[arg(long, default_value_t = false)]
        skip_pending: bool,
    },
    /// Write the project's measurement link events as CSV.
    Report {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
        /// Output file; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, serde::Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
}

#[derive(Debug, serde::Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    init_tracing();
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Export { project, output_dir, skip_pending } => {
            run_export(&project, output_dir.as_deref(), skip_pending)
        }
        Commands::Report { project, output } => run_report(&project, output.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let info = read_info(&bytes).context("failed to read PDF metadata")?;

    let first_page_size_pt = info
        .page_sizes
        .first()
        .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt });

    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count: info.page_count,
        first_page_size_pt,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

fn run_export(project_path: &Path, output_dir: Option<&Path>, skip_pending: bool) -> Result<()> {
    ensure_file_exists(project_path)?;

    let loaded = load_project(project_path)
        .with_context(|| format!("failed to load project {}", project_path.display()))?;

    let output_dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => project_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
    };
    fs::create_dir_all(&output_dir)?;

    let options = ExportOptions {
        calibration: Some(loaded.project.settings.scale.clone()),
        skip_pending,
    };

    for document in &loaded.project.documents {
        let pdf_bytes = document.pdf_bytes().context("corrupt document payload")?;
        let baked = export_to_pdf(
            &pdf_bytes,
            &document.markups_by_page(),
            document.base_scale,
            &options,
        )
        .with_context(|| format!("failed to export document {}", document.name))?;

        let output = output_dir.join(marked_file_name(&document.name));
        fs::write(&output, baked)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("{}", output.display());
    }

    Ok(())
}

fn run_report(project_path: &Path, output: Option<&Path>) -> Result<()> {
    ensure_file_exists(project_path)?;

    let loaded = load_project(project_path)
        .with_context(|| format!("failed to load project {}", project_path.display()))?;

    let events = collect_events(&loaded);

    let mut writer = csv::Writer::from_writer(Vec::new());
    for event in &events {
        writer.serialize(event)?;
    }
    let csv_bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to finish CSV: {e}"))?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, csv_bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", path.display());
        }
        None => {
            std::io::stdout().write_all(&csv_bytes)?;
        }
    }

    Ok(())
}

fn collect_events(loaded: &LoadedProject) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    for document in &loaded.project.documents {
        if let Some(graph) = loaded.link_graphs.get(&document.id) {
            events.extend(graph.events());
        }
    }
    events
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }
    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }
    Ok(())
}

fn marked_file_name(document_name: &str) -> String {
    let stem = Path::new(document_name)
        .file_stem()
        .and_then(|name| name.to_str())
        .unwrap_or("document");
    format!("{stem}-marked.pdf")
}
