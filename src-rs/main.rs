use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use visual_snapshot::compare::run_comparison;
use visual_snapshot::store::ensure_parent_dir;
use visual_snapshot::{
    CommandDriver, ComparatorKind, ComparisonRequest, Driver, Expectation, Harness,
    HarnessOptions, ImageFileDriver, PollOptions, Rectangle, RecordingAssertions, Regions,
    ResolvedRegions, ReviewServer, ServerOptions, Verdict,
};

#[derive(Parser, Debug)]
#[command(
    name = "visual-snapshot",
    version,
    about = "Screenshot regression checks with a reviewable baseline store"
)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// JSON options file (defaults apply to missing keys)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Snapshot root; overrides config and VSNAP_SCREENSHOT_PATH
    #[arg(long, global = true)]
    screenshot_path: Option<PathBuf>,
    /// Comparison backend
    #[arg(long, global = true, value_enum)]
    comparator: Option<ComparatorArg>,
    /// Group segment, repeatable for nesting
    #[arg(long = "group", global = true)]
    groups: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ComparatorArg {
    Pixel,
    Magick,
}

impl From<ComparatorArg> for ComparatorKind {
    fn from(arg: ComparatorArg) -> Self {
        match arg {
            ComparatorArg::Pixel => ComparatorKind::Pixel,
            ComparatorArg::Magick => ComparatorKind::Magick,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Capture (or take) a screenshot and check it against its baseline
    Check(CheckArgs),
    /// Promote pending captures to baselines
    Accept(AcceptArgs),
    /// Reject every pending diff, keeping baselines
    Clear,
    /// List pending diffs, oldest first
    List,
    /// Report NEW, STABLE or UNSTABLE for a name
    State(StateArgs),
    /// Delete everything under the snapshot root
    Reset(ResetArgs),
    /// Compare two arbitrary images
    Diff(DiffArgs),
    /// Run the HTTP review API
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RegionArgs {
    /// Compare only this box (x,y,w,h); repeatable
    #[arg(long = "include")]
    include: Vec<Rectangle>,
    /// Compare only elements matching this selector; repeatable
    #[arg(long = "include-matching")]
    include_matching: Vec<String>,
    /// Ignore this box (x,y,w,h); repeatable
    #[arg(long = "skip")]
    skip: Vec<Rectangle>,
    /// Ignore elements matching this selector; repeatable
    #[arg(long = "skip-matching")]
    skip_matching: Vec<String>,
}

impl RegionArgs {
    fn to_regions(&self) -> Result<Regions> {
        let mut regions = Regions::new();
        for rect in &self.include {
            regions.add_include_only_rect(rect.x, rect.y, rect.w, rect.h)?;
        }
        for selector in &self.include_matching {
            regions.add_include_only_selector(selector.as_str())?;
        }
        for rect in &self.skip {
            regions.add_skip_rect(rect.x, rect.y, rect.w, rect.h);
        }
        for selector in &self.skip_matching {
            regions.add_skip_selector(selector.as_str());
        }
        Ok(regions)
    }
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Snapshot name, relative to the current group
    name: String,
    /// Full-page screenshot to check
    #[arg(long)]
    candidate: Option<PathBuf>,
    /// Element bounds on the candidate as selector=x,y,w,h; repeatable
    #[arg(long = "element", value_parser = parse_element)]
    elements: Vec<(String, Rectangle)>,
    /// Capture only the element matching this selector
    #[arg(long)]
    target: Option<String>,
    #[command(flatten)]
    regions: RegionArgs,
    /// Expect the capture to differ from its baseline
    #[arg(long, action = ArgAction::SetTrue)]
    unstable: bool,
    /// Captures to try while a diff is detected
    #[arg(long, default_value_t = 1)]
    attempts: u32,
    /// Delay between captures
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,
    /// Seconds before the capture command is killed
    #[arg(long, default_value_t = 60)]
    capture_timeout_secs: u64,
    /// Capture command after `--`; `{out}` and `{target}` are substituted
    #[arg(last = true)]
    capture_cmd: Vec<String>,
}

#[derive(Args, Debug)]
struct AcceptArgs {
    #[arg(required = true)]
    names: Vec<String>,
}

#[derive(Args, Debug)]
struct StateArgs {
    name: String,
}

#[derive(Args, Debug)]
struct ResetArgs {
    /// Confirm deletion of every baseline
    #[arg(long, action = ArgAction::SetTrue)]
    yes: bool,
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Path to current image
    candidate: PathBuf,
    /// Path to baseline image
    baseline: PathBuf,
    /// Path to write diff image (PNG)
    #[arg(long)]
    diff_out: Option<PathBuf>,
    /// Path to write JSON report
    #[arg(long)]
    json_out: Option<PathBuf>,
    /// Compare only this box (x,y,w,h); repeatable
    #[arg(long = "include")]
    include: Vec<Rectangle>,
    /// Ignore this box (x,y,w,h); repeatable
    #[arg(long = "skip")]
    skip: Vec<Rectangle>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Check(args) => command_check(&cli.store, args),
        Commands::Accept(args) => command_accept(&cli.store, args),
        Commands::Clear => command_clear(&cli.store),
        Commands::List => command_list(&cli.store),
        Commands::State(args) => command_state(&cli.store, args),
        Commands::Reset(args) => command_reset(&cli.store, args),
        Commands::Diff(args) => command_diff(&cli.store, args),
        Commands::Serve(args) => command_serve(&cli.store, args),
    }
}

fn print_commands() -> Result<()> {
    let rows: Vec<Value> = [
        ("check", "Capture or take a screenshot and check it against its baseline."),
        ("accept", "Promote pending captures to baselines."),
        ("clear", "Reject every pending diff."),
        ("list", "List pending diffs, oldest first."),
        ("state", "Report the lifecycle state of one snapshot."),
        ("reset", "Delete every snapshot under the root."),
        ("diff", "Compare two arbitrary images."),
        ("serve", "Run the HTTP review API."),
    ]
    .iter()
    .map(|(name, description)| json!({ "name": name, "description": description }))
    .collect();

    println!("{}", serde_json::to_string_pretty(&json!({ "commands": rows }))?);
    Ok(())
}

fn load_options(store: &StoreArgs) -> Result<HarnessOptions> {
    let mut options = HarnessOptions::load(store.config.as_deref())?;
    if let Some(root) = &store.screenshot_path {
        options.screenshot_path = root.clone();
    }
    if let Some(kind) = store.comparator {
        options.comparator = kind.into();
    }
    Ok(options)
}

fn open_harness(store: &StoreArgs) -> Result<Harness> {
    let options = load_options(store)?;
    let mut harness = Harness::from_options(&options)?;
    for group in &store.groups {
        harness.group(group)?;
    }
    Ok(harness)
}

fn command_check(store: &StoreArgs, args: CheckArgs) -> Result<()> {
    let recorder = Arc::new(RecordingAssertions::new());
    let harness = open_harness(store)?.with_assertions(recorder.clone());
    let regions = args.regions.to_regions()?;
    let poll = PollOptions::new(args.attempts, args.wait_ms)?;

    let verdict = match (&args.candidate, args.capture_cmd.is_empty()) {
        (Some(candidate), true) => {
            if !candidate.exists() {
                bail!("candidate image not found: {}", candidate.display());
            }
            let backend = args
                .elements
                .iter()
                .fold(ImageFileDriver::new(candidate), |driver, (selector, bounds)| {
                    driver.with_element(selector.clone(), *bounds)
                });
            run_check(&harness, Driver::SeleniumLike(&backend), &args, &regions, poll)?
        }
        (None, false) => {
            if regions.has_selectors() {
                bail!("a capture command cannot resolve selectors; use --include/--skip rectangles");
            }
            let backend = CommandDriver::from_argv(&args.capture_cmd)?
                .with_timeout(Duration::from_secs(args.capture_timeout_secs.max(1)));
            run_check(&harness, Driver::PhantomLike(&backend), &args, &regions, poll)?
        }
        (Some(_), false) => bail!("--candidate and a capture command are mutually exclusive"),
        (None, true) => bail!("pass --candidate <png> or a capture command after `--`"),
    };

    let paths = harness.paths(&args.name)?;
    let payload = json!({
        "verdict": verdict,
        "goodPath": abs_path(&paths.good_path).display().to_string(),
        "newPath": abs_path(&paths.new_path).display().to_string(),
        "diffPath": abs_path(&paths.diff_path).display().to_string(),
        "failures": recorder.failures(),
    });
    println!("{}", serde_json::to_string(&payload)?);

    if !verdict.passed {
        bail!(
            "screenshot {} did not meet expectation {:?} (state {:?})",
            verdict.name,
            verdict.expectation,
            verdict.state
        );
    }
    Ok(())
}

fn run_check(
    harness: &Harness,
    driver: Driver<'_>,
    args: &CheckArgs,
    regions: &Regions,
    poll: PollOptions,
) -> Result<Verdict> {
    let expectation = if args.unstable {
        Expectation::Unstable
    } else {
        Expectation::Stable
    };
    harness
        .check(driver, args.target.as_deref(), regions, &args.name, expectation, poll)
        .with_context(|| format!("check failed for {}", args.name))
}

fn command_accept(store: &StoreArgs, args: AcceptArgs) -> Result<()> {
    let harness = open_harness(store)?;
    harness.accept_diffs(&args.names)?;
    println!("{}", serde_json::to_string(&json!({ "accepted": args.names }))?);
    Ok(())
}

fn command_clear(store: &StoreArgs) -> Result<()> {
    let harness = open_harness(store)?;
    let cleared = harness.clear_diffs()?;
    println!("{}", serde_json::to_string(&json!({ "cleared": cleared }))?);
    Ok(())
}

fn command_list(store: &StoreArgs) -> Result<()> {
    let harness = open_harness(store)?;
    let diffs = harness.list_of_diffs()?;
    println!("{}", serde_json::to_string(&json!({ "diffs": diffs }))?);
    Ok(())
}

fn command_state(store: &StoreArgs, args: StateArgs) -> Result<()> {
    let harness = open_harness(store)?;
    let payload = json!({
        "name": args.name,
        "state": harness.state(&args.name)?,
        "paths": harness.paths(&args.name)?,
        "currentPath": abs_path(&harness.current_path()).display().to_string(),
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn command_reset(store: &StoreArgs, args: ResetArgs) -> Result<()> {
    if !args.yes {
        bail!("reset deletes every baseline; pass --yes to confirm");
    }
    let harness = open_harness(store)?;
    harness.destructive_clear_all_snapshots()?;
    let root = abs_path(harness.store().root());
    println!("{}", serde_json::to_string(&json!({ "reset": root.display().to_string() }))?);
    Ok(())
}

fn command_diff(store: &StoreArgs, args: DiffArgs) -> Result<()> {
    let options = load_options(store)?;
    let comparator = options.build_comparator();
    let mut request = ComparisonRequest::new(&args.candidate, &args.baseline).with_regions(ResolvedRegions {
        include_only: args.include.clone(),
        skip: args.skip.clone(),
    });
    if let Some(path) = &args.diff_out {
        request = request.with_diff_output(path);
    }

    let result = run_comparison(&request, comparator.as_ref())?;
    let payload = json!({
        "candidate": abs_path(&args.candidate).display().to_string(),
        "baseline": abs_path(&args.baseline).display().to_string(),
        "diff": args.diff_out.as_deref().map(|p| abs_path(p).display().to_string()),
        "comparator": comparator.name(),
        "result": result,
    });
    if let Some(path) = &args.json_out {
        write_json_pretty(path, &payload)?;
    }
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn command_serve(store: &StoreArgs, args: ServeArgs) -> Result<()> {
    let harness = open_harness(store)?;
    let defaults = ServerOptions::default();
    let options = ServerOptions {
        host: args.host.unwrap_or(defaults.host),
        port: args.port.unwrap_or(defaults.port),
    };
    let server = ReviewServer::new(harness.store())
        .bind(&options)
        .with_context(|| format!("failed to bind review server on {}", options.addr()))?;
    info!(url = %server.url(), "started server");
    server.serve();
    Ok(())
}

fn parse_element(raw: &str) -> std::result::Result<(String, Rectangle), String> {
    let (selector, rect) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected selector=x,y,w,h, got {raw:?}"))?;
    if selector.is_empty() {
        return Err(format!("empty selector in {raw:?}"));
    }
    let rect: Rectangle = rect.parse().map_err(|err| format!("{err}"))?;
    Ok((selector.to_string(), rect))
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)
        .with_context(|| format!("failed to create parent directory of {}", path.display()))?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn element_selectors_may_contain_equals() {
        let (selector, rect) = parse_element("[data-id=clock]=1,2,3,4").unwrap();
        assert_eq!(selector, "[data-id=clock]");
        assert_eq!(rect, Rectangle::new(1, 2, 3, 4));
        assert!(parse_element("=1,2,3,4").is_err());
        assert!(parse_element("nope").is_err());
    }

    #[test]
    fn check_parses_regions_and_capture_command() {
        let cli = Cli::try_parse_from([
            "visual-snapshot",
            "--group",
            "login",
            "check",
            "form",
            "--include",
            "0,0,10,10",
            "--skip",
            "2,2,1,1",
            "--attempts",
            "3",
            "--",
            "render",
            "--out",
            "{out}",
        ])
        .unwrap();
        assert_eq!(cli.store.groups, vec!["login".to_string()]);
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.attempts, 3);
        assert_eq!(args.capture_cmd, vec!["render", "--out", "{out}"]);
        let regions = args.regions.to_regions().unwrap();
        assert!(!regions.is_empty());
    }

    #[test]
    fn capture_command_with_selector_regions_fails_before_capturing() {
        let dir = tempdir().unwrap();
        let root = dir.path().display().to_string();
        let cli = Cli::try_parse_from([
            "visual-snapshot",
            "--screenshot-path",
            root.as_str(),
            "check",
            "clock",
            "--skip-matching",
            ".clock",
            "--",
            "touch",
            "{out}",
        ])
        .unwrap();
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        let err = command_check(&cli.store, args).unwrap_err();
        assert!(err.to_string().contains("cannot resolve selectors"), "{err:#}");
        assert!(!dir.path().join("clock.new.png").exists());
    }

    #[test]
    fn bad_rectangles_are_rejected_by_the_parser() {
        let parsed = Cli::try_parse_from(["visual-snapshot", "diff", "a.png", "b.png", "--skip", "1,2,3"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn writes_json_pretty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        write_json_pretty(&path, &json!({"ok": true})).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ok\": true"));
    }
}
