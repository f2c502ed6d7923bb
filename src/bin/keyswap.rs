// Keyswap CLI
// Manage swap rules and run the global key swap engine

use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(target_os = "macos")]
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use keyswap_core::headless;
use keyswap_core::{
    default_settings_content, Collaborators, FileStore, KeyRemapper, KeyboardType,
    PermissionGate, RuleId, Settings, TrustProvider,
};

/// How often `run` re-queries accessibility trust
#[cfg(target_os = "macos")]
const PERMISSION_RECHECK: Duration = Duration::from_secs(5);

/// System-wide letter/digit key swapping
#[derive(Parser, Debug)]
#[command(name = "keyswap")]
#[command(version)]
#[command(about = "Swap letter and digit keys system-wide, following the active keyboard layout", long_about = None)]
struct Args {
    /// Settings file (default: ~/.config/keyswap/settings.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the event tap and swap keys until interrupted
    Run,

    /// List, add, remove, enable or disable swap rules
    #[command(subcommand)]
    Rules(RulesCommand),

    /// Print the character to key code table of the active layout
    Layout,

    /// Report accessibility permission
    Permission {
        /// Show the system consent prompt if permission is missing
        #[arg(long)]
        prompt: bool,
    },

    /// Turn remapping on
    Enable,

    /// Turn remapping off
    Disable,

    /// Write the default settings file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Show all rules in match order
    List,

    /// Add a rule from two characters, e.g. "fg"
    Add {
        pair: String,

        /// Only swap on this keyboard type
        #[arg(long, value_name = "N")]
        keyboard_type: Option<i64>,
    },

    /// Remove a rule by id or unique id prefix
    Remove { id: String },

    /// Enable a rule by id or unique id prefix
    Enable { id: String },

    /// Disable a rule by id or unique id prefix
    Disable { id: String },
}

fn init_logging(verbose: bool, settings: &Settings) {
    let default_filter = settings.log_level().unwrap_or("info");
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn open_storage(settings: &Settings) -> Result<Arc<FileStore>> {
    let dir = settings
        .storage_dir()
        .ok_or_else(|| anyhow!("no storage directory configured and no home directory found"))?;
    log::debug!("Using state directory {}", dir.display());
    Ok(Arc::new(FileStore::new(dir)))
}

/// Collaborators for commands that only edit state.
///
/// Nothing is intercepted and no permission prompt is shown; the real event
/// tap is only installed by `run`.
fn editing_collaborators(storage: Arc<FileStore>) -> Collaborators {
    #[allow(unused_mut)]
    let mut collaborators = headless::collaborators(storage);
    #[cfg(target_os = "macos")]
    {
        collaborators.layout_source = Arc::new(keyswap_core::platform::macos::InputSourceLayout::new());
    }
    collaborators
}

fn trust_provider() -> Box<dyn TrustProvider> {
    #[cfg(target_os = "macos")]
    {
        Box::new(keyswap_core::platform::macos::AccessibilityTrust::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(headless::StaticTrust::granted())
    }
}

/// Resolve a full rule id or a prefix matching exactly one rule
fn resolve_rule(remapper: &KeyRemapper, text: &str) -> Result<RuleId> {
    if let Ok(id) = text.parse::<RuleId>() {
        return Ok(id);
    }
    let needle = text.to_lowercase();
    let matches: Vec<RuleId> = remapper
        .rules()
        .iter()
        .map(|rule| rule.id)
        .filter(|id| id.to_string().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no rule matches '{}'", text),
        _ => bail!("'{}' matches {} rules, use a longer prefix", text, matches.len()),
    }
}

fn print_rules(remapper: &KeyRemapper) {
    let rules = remapper.rules();
    if rules.is_empty() {
        println!("No swap rules.");
        return;
    }
    for (i, rule) in rules.iter().enumerate() {
        println!(
            "{:>2}. {}  {} <-> {}  {:<16} {}",
            i + 1,
            rule.id,
            rule.first_key,
            rule.second_key,
            remapper.keyboard_label(rule.keyboard_type),
            if rule.is_enabled { "on" } else { "off" }
        );
    }
}

fn rules_command(command: RulesCommand, remapper: &KeyRemapper) -> Result<()> {
    match command {
        RulesCommand::List => print_rules(remapper),
        RulesCommand::Add {
            pair,
            keyboard_type,
        } => {
            let rule = remapper
                .try_add_rule_pair(&pair, keyboard_type.map(KeyboardType))
                .with_context(|| format!("rule '{}' not added", pair))?;
            println!("Added {}", rule);
        }
        RulesCommand::Remove { id } => {
            let id = resolve_rule(remapper, &id)?;
            let rule = remapper
                .remove_rule(id)
                .ok_or_else(|| anyhow!("no rule with id {}", id))?;
            println!("Removed {}", rule);
        }
        RulesCommand::Enable { id } => set_rule_enabled(remapper, &id, true)?,
        RulesCommand::Disable { id } => set_rule_enabled(remapper, &id, false)?,
    }
    Ok(())
}

fn set_rule_enabled(remapper: &KeyRemapper, text: &str, enabled: bool) -> Result<()> {
    let id = resolve_rule(remapper, text)?;
    if !remapper.set_rule_enabled(id, enabled) {
        bail!("no rule with id {}", id);
    }
    if let Some(rule) = remapper.rule(id) {
        println!("{} {}", if enabled { "Enabled" } else { "Disabled" }, rule);
    }
    Ok(())
}

fn set_remap_enabled(remapper: &KeyRemapper, enabled: bool) -> Result<()> {
    let now_enabled = remapper.set_remap_enabled(enabled);
    println!("Remapping {}", if now_enabled { "enabled" } else { "disabled" });
    if now_enabled != enabled {
        let reason = remapper
            .last_start_error()
            .unwrap_or_else(|| "unknown reason".to_string());
        bail!("could not enable remapping: {}", reason);
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run(_remapper: &mut KeyRemapper, _settings: &Settings) -> Result<()> {
    bail!("the global key event tap is only available on macOS")
}

#[cfg(target_os = "macos")]
fn run(remapper: &mut KeyRemapper, settings: &Settings) -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use keyswap_core::platform::macos::pump_run_loop;
    use signal_hook::iterator::Signals;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        let mut signals = Signals::new([signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM])
            .context("failed to install signal handlers")?;
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                log::info!("Received signal, shutting down");
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    if remapper.rules().is_empty() {
        log::warn!("No swap rules; add one with `keyswap rules add <PAIR>`");
    }
    if !remapper.is_remap_enabled() {
        log::warn!("Remapping is off; turn it on with `keyswap enable`");
    }
    if let Some(error) = remapper.last_start_error() {
        log::warn!("{}", error);
    }
    log::info!("Engine {}", remapper.status().state);

    let mut last_check = Instant::now();
    while running.load(Ordering::SeqCst) {
        pump_run_loop(settings.poll_interval());

        let work = remapper.process_pending();
        if work.new_keyboard_types > 0 {
            log::info!("Keyboard types seen: {:?}", remapper.seen_keyboard_types());
        }
        if work.tap_removed {
            if let Some(error) = remapper.last_start_error() {
                log::error!("{}", error);
            }
        }
        if last_check.elapsed() >= PERMISSION_RECHECK {
            last_check = Instant::now();
            let before = remapper.status().state;
            remapper.refresh_accessibility_status();
            let after = remapper.status().state;
            if before != after {
                log::info!("Engine {}", after);
            }
        }
    }

    remapper.shutdown();
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, default_settings_content())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::InitConfig { force } = args.command {
        let path = args
            .config
            .clone()
            .or_else(Settings::default_path)
            .ok_or_else(|| anyhow!("no config directory found; pass --config"))?;
        return init_config(&path, force);
    }

    let settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    init_logging(args.verbose, &settings);
    if let Some(path) = settings.source_path() {
        log::debug!("Loaded settings from {}", path.display());
    }
    let storage = open_storage(&settings)?;

    match args.command {
        Command::Run => {
            #[cfg(target_os = "macos")]
            let collaborators = keyswap_core::platform::macos::collaborators(storage);
            #[cfg(not(target_os = "macos"))]
            let collaborators = headless::collaborators(storage);

            let mut remapper = KeyRemapper::new(collaborators);
            if let Some(enabled) = settings.remap_enabled() {
                remapper.set_remap_enabled(enabled);
            }
            run(&mut remapper, &settings)
        }
        Command::Rules(command) => {
            let remapper = KeyRemapper::new(editing_collaborators(storage));
            rules_command(command, &remapper)
        }
        Command::Layout => {
            let remapper = KeyRemapper::new(editing_collaborators(storage));
            let layout = remapper.layout();
            if layout.is_empty() {
                bail!("the active keyboard layout produces no letters or digits");
            }
            let mut entries = layout.entries();
            entries.sort_by_key(|(_, c)| *c);
            for (code, c) in entries {
                println!("{}  {}", c, code);
            }
            Ok(())
        }
        Command::Permission { prompt } => {
            let gate = PermissionGate::new(trust_provider());
            if gate.ensure(prompt) {
                println!("Accessibility permission granted");
            } else if prompt {
                println!("Accessibility permission missing; approve keyswap in System Settings > Privacy & Security > Accessibility");
            } else {
                println!("Accessibility permission missing; run `keyswap permission --prompt`");
            }
            Ok(())
        }
        Command::Enable => {
            set_remap_enabled(&KeyRemapper::new(editing_collaborators(storage)), true)
        }
        Command::Disable => {
            set_remap_enabled(&KeyRemapper::new(editing_collaborators(storage)), false)
        }
        Command::InitConfig { .. } => unreachable!("handled before settings are loaded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["keyswap", "--config", "/tmp/test.toml", "layout"]);

        assert_eq!(args.config, Some(PathBuf::from("/tmp/test.toml")));
        assert!(!args.verbose);
        assert!(matches!(args.command, Command::Layout));
    }

    #[test]
    fn test_args_rules_add() {
        let args = Args::parse_from(["keyswap", "-v", "rules", "add", "fg", "--keyboard-type", "40"]);

        assert!(args.verbose);
        match args.command {
            Command::Rules(RulesCommand::Add {
                pair,
                keyboard_type,
            }) => {
                assert_eq!(pair, "fg");
                assert_eq!(keyboard_type, Some(40));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_args_permission_prompt() {
        let args = Args::parse_from(["keyswap", "permission", "--prompt"]);
        assert!(matches!(args.command, Command::Permission { prompt: true }));
    }

    #[test]
    fn test_args_require_command() {
        assert!(Args::try_parse_from(["keyswap"]).is_err());
    }

    #[test]
    fn test_resolve_rule_by_prefix() {
        let remapper = KeyRemapper::new(headless::collaborators(Arc::new(
            keyswap_core::MemoryStore::new(),
        )));
        remapper.add_rule_pair("fg", None);
        let id = remapper.rules()[0].id;

        let prefix = &id.to_string()[..8];
        assert_eq!(resolve_rule(&remapper, prefix).unwrap(), id);
        assert_eq!(resolve_rule(&remapper, &id.to_string()).unwrap(), id);
        assert!(resolve_rule(&remapper, "zzzz").is_err());
    }

    #[test]
    fn test_set_remap_enabled_reports_denial() {
        let mut collaborators = headless::collaborators(Arc::new(keyswap_core::MemoryStore::new()));
        collaborators.trust = Box::new(headless::StaticTrust::denied());
        let remapper = KeyRemapper::new(collaborators);

        let err = set_remap_enabled(&remapper, true).unwrap_err();
        assert!(err.to_string().contains("Enable Accessibility permission"));
        assert!(!remapper.is_remap_enabled());

        assert!(set_remap_enabled(&remapper, false).is_ok());
    }
}
