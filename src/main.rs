//! deck CLI
//!
//! Entry point for the `deck` command-line tool.

use clap::{Parser, Subcommand};
use deck_env::config::{DeckConfig, EffectiveConfig, LoggingConfig};
use deck_env::layout::{BuildStatus, DeckLayout, LayoutError};
use deck_env::pipeline::{ImagePipeline, PipelineError};
use deck_env::ports::{
    default_roles, get_resolution_suggestions, validate_port, CheckMode, PortEngine, PortRole,
    Protocol,
};
use deck_env::{logging, signal, CancellationToken, ConfigurationLayer, ProjectType};
use deck_policy::{
    guidance_for, DirectoryOperation, FileOperation, Permission, PermissionEngine, ViolationKind,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

/// Exit code for a denied policy check
const EXIT_DENIED: i32 = 3;

#[derive(Parser)]
#[command(name = "deck")]
#[command(about = "Templates -> Custom -> Images development environments", version)]
struct Cli {
    /// Project root
    #[arg(long, short = 'p', global = true, default_value = ".")]
    project: PathBuf,

    /// User config file (default: ~/.config/deck/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing .deck layer directories
    Init,

    /// Check the .deck layout
    Validate {
        #[arg(long)]
        json: bool,
    },

    /// List configurations in every layer
    List {
        #[arg(long)]
        json: bool,
    },

    /// Copy a template into the Custom layer
    Copy {
        template: String,

        /// Custom configuration name (default: <template>-custom)
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Image commands
    Image {
        #[command(subcommand)]
        action: ImageCommands,
    },

    /// Ask the permission policy about an operation
    Check {
        #[command(subcommand)]
        action: CheckCommands,
    },

    /// Explain a policy violation
    Explain {
        /// Violation code, e.g. PROTECTED_FILE_MODIFICATION
        violation: ViolationKind,

        #[arg(long)]
        json: bool,
    },

    /// Port commands
    Ports {
        #[command(subcommand)]
        action: PortsCommands,
    },

    /// Show the active permission policy
    Policy {
        #[arg(long)]
        json: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Materialize a Custom configuration as a new image
    Create {
        custom: String,

        /// Image name prefix (default: the custom name)
        #[arg(long)]
        prefix: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show an image's metadata, optionally recording a new build status
    Status {
        name: String,

        /// prepared, building, built or failed
        #[arg(long)]
        set: Option<BuildStatus>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CheckCommands {
    /// Check a file operation
    File {
        path: PathBuf,

        #[arg(long)]
        op: FileOperation,

        #[arg(long)]
        json: bool,
    },

    /// Check a directory operation
    Dir {
        path: PathBuf,

        #[arg(long)]
        op: DirectoryOperation,

        #[arg(long)]
        json: bool,
    },

    /// Check changes to a .env file
    Env {
        path: PathBuf,

        /// KEY=VALUE pairs
        #[arg(required = true)]
        changes: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Check an image directory name
    Name {
        name: String,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PortsCommands {
    /// Probe ports for availability
    Check {
        #[arg(required = true)]
        ports: Vec<u16>,

        #[arg(long)]
        udp: bool,

        /// Probe by connecting instead of binding
        #[arg(long)]
        connect: bool,

        #[arg(long)]
        json: bool,
    },

    /// Allocate ports for a project type
    Allocate {
        #[arg(long = "type", short = 't')]
        project_type: ProjectType,

        /// Roles to allocate (default: every role of the type)
        #[arg(long = "role", short = 'r')]
        roles: Vec<PortRole>,

        #[arg(long)]
        json: bool,
    },

    /// Range-check a port number
    Validate {
        port: u32,

        /// Flag ports below 1024
        #[arg(long)]
        privileged: bool,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as JSON
    Show,
}

struct Context {
    project: PathBuf,
    config: EffectiveConfig,
    cancel: CancellationToken,
    pipeline: ImagePipeline,
}

impl Context {
    fn layout(&self) -> &DeckLayout {
        self.pipeline.layout()
    }

    fn policy(&self) -> &PermissionEngine {
        self.pipeline.layout().policy()
    }

    fn ports(&self, mode: CheckMode) -> PortEngine {
        PortEngine::from_config(&self.config.config, mode, self.cancel.clone())
    }

    /// Relative paths are taken from the project root.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project.join(path)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let ctx = load_context(&cli);

    match cli.command {
        Commands::Init => run_init(&ctx),
        Commands::Validate { json } => run_validate(&ctx, json),
        Commands::List { json } => run_list(&ctx, json),
        Commands::Copy { template, name } => run_copy(&ctx, &template, name.as_deref()),
        Commands::Image { action } => match action {
            ImageCommands::Create {
                custom,
                prefix,
                json,
            } => run_image_create(&ctx, &custom, prefix.as_deref(), json),
            ImageCommands::Status { name, set, json } => {
                run_image_status(&ctx, &name, set, json)
            }
        },
        Commands::Check { action } => match action {
            CheckCommands::File { path, op, json } => run_check_file(&ctx, &path, op, json),
            CheckCommands::Dir { path, op, json } => run_check_dir(&ctx, &path, op, json),
            CheckCommands::Env {
                path,
                changes,
                json,
            } => run_check_env(&ctx, &path, &changes, json),
            CheckCommands::Name { name, json } => run_check_name(&ctx, &name, json),
        },
        Commands::Explain { violation, json } => run_explain(violation, json),
        Commands::Ports { action } => match action {
            PortsCommands::Check {
                ports,
                udp,
                connect,
                json,
            } => run_ports_check(&ctx, &ports, udp, connect, json),
            PortsCommands::Allocate {
                project_type,
                roles,
                json,
            } => run_ports_allocate(&ctx, project_type, roles, json),
            PortsCommands::Validate {
                port,
                privileged,
                json,
            } => run_ports_validate(port, privileged, json),
        },
        Commands::Policy { json } => run_policy(&ctx, json),
        Commands::Config { action } => match action {
            ConfigCommands::Show => run_config_show(&ctx),
        },
    }
}

fn load_context(cli: &Cli) -> Context {
    let overrides = cli.log_level.as_ref().map(|level| DeckConfig {
        logging: Some(LoggingConfig {
            level: Some(level.clone()),
            ..Default::default()
        }),
        ..Default::default()
    });

    let config = match EffectiveConfig::discover(&cli.project, cli.config.as_deref(), overrides) {
        Ok(c) => c,
        Err(e) => fail(PipelineError::from(e)),
    };

    if let Err(e) = logging::init(&config.config) {
        eprintln!("Warning: could not open log file: {}", e);
    }

    let cancel = CancellationToken::new();
    if let Err(e) = signal::install(cancel.clone()) {
        tracing::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let pipeline = ImagePipeline::from_config(&cli.project, &config.config, cancel.clone())
        .unwrap_or_else(|e| fail(e));

    Context {
        project: cli.project.clone(),
        config,
        cancel,
        pipeline,
    }
}

fn fail(err: PipelineError) -> ! {
    eprintln!("Error: {}", err);
    if let Some(suggestion) = err.suggestion() {
        eprintln!("  Suggestion: {}", suggestion);
    }
    process::exit(err.exit_code());
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn run_init(ctx: &Context) {
    let layout = ctx.layout();
    if let Err(e) = layout.initialize_layout() {
        fail(e.into());
    }
    println!("Initialized {}", layout.deck_root().display());
}

fn run_validate(ctx: &Context, json: bool) {
    let result = match ctx.layout().validate_layout() {
        Ok(r) => r,
        Err(e) => fail(e.into()),
    };

    if json {
        print_json(&result);
    } else {
        println!("Layout {}", if result.is_valid { "valid" } else { "invalid" });
        for error in &result.errors {
            println!("  error: {}", error);
        }
        for warning in &result.warnings {
            println!("  warning: {}", warning);
        }
        for suggestion in &result.repair_suggestions {
            println!("  fix: {}", suggestion);
        }
    }

    if !result.is_valid {
        process::exit(2);
    }
}

fn run_list(ctx: &Context, json: bool) {
    let options = match ctx.layout().list_layer_options() {
        Ok(o) => o,
        Err(e) => fail(e.into()),
    };

    if json {
        print_json(&options);
        return;
    }

    for layer in ConfigurationLayer::ALL {
        let found = options.get(layer);
        println!("{} ({}):", layer, found.len());
        for option in found {
            let marker = if option.is_available { "" } else { " (not runnable)" };
            println!("  {} [{}]{}", option.name, option.project_type, marker);
        }
    }
}

fn run_copy(ctx: &Context, template: &str, name: Option<&str>) {
    match ctx.layout().copy_template_to_custom(template, name, &ctx.cancel) {
        Ok(created) => println!("Created custom configuration '{}'", created),
        Err(e) => fail(e.into()),
    }
}

fn run_image_create(ctx: &Context, custom: &str, prefix: Option<&str>, json: bool) {
    let image = match ctx.pipeline.materialize_image(custom, prefix) {
        Ok(i) => i,
        Err(e) => fail(e),
    };

    if json {
        print_json(&image);
        return;
    }

    println!("Created image '{}' ({})", image.image_name, image.project_type);
    println!("  Path: {}", image.path.display());
    println!("  Ports: {}", image.ports.summary);
    if !image.protected_files.is_empty() {
        println!("  Read-only: {}", image.protected_files.join(", "));
    }
}

fn run_image_status(ctx: &Context, name: &str, set: Option<BuildStatus>, json: bool) {
    let metadata = match set {
        Some(status) => match ctx.pipeline.record_build_status(name, status) {
            Ok(m) => m,
            Err(e) => fail(e),
        },
        None => match ctx.layout().get_image_metadata(name) {
            Ok(Some(m)) => m,
            Ok(None) => fail(LayoutError::ImageNotFound(name.to_string()).into()),
            Err(e) => fail(e.into()),
        },
    };

    if json {
        print_json(&metadata);
        return;
    }

    println!("Image: {}", metadata.image_name);
    println!("  Status: {}", metadata.build_status);
    println!("  Source: {}", metadata.source_custom);
    println!("  Created: {} by {}", metadata.created_at.to_rfc3339(), metadata.created_by);
    if let Some(container) = &metadata.container_name {
        println!("  Container: {}", container);
    }
    if let Some(started) = &metadata.last_started {
        println!("  Last started: {}", started.to_rfc3339());
    }
}

fn print_decision(
    permission: Permission,
    reason: &str,
    alternatives: &[String],
    suggestions: &[String],
    violation: Option<ViolationKind>,
) {
    println!("{}: {}", permission, reason);
    for alt in alternatives {
        println!("  alternative: {}", alt);
    }
    for suggestion in suggestions {
        println!("  suggestion: {}", suggestion);
    }
    if let Some(v) = violation {
        println!("  see: deck explain {}", v);
    }
}

fn run_check_file(ctx: &Context, path: &Path, op: FileOperation, json: bool) {
    let result = ctx.policy().check_file(&ctx.resolve(path), op);

    if json {
        print_json(&result);
    } else {
        print_decision(
            result.permission,
            &result.reason,
            &result.alternatives,
            &result.suggestions,
            result.violation,
        );
    }

    if result.permission == Permission::Denied {
        process::exit(EXIT_DENIED);
    }
}

fn run_check_dir(ctx: &Context, path: &Path, op: DirectoryOperation, json: bool) {
    let result = ctx.policy().check_directory(&ctx.resolve(path), op);

    if json {
        print_json(&result);
    } else {
        print_decision(
            result.permission,
            &result.reason,
            &result.alternatives,
            &result.suggestions,
            result.violation,
        );
        if let Some(impact) = &result.impact {
            println!(
                "  impact: {:?} ({})",
                impact.level,
                impact.affected_components.join(", ")
            );
        }
    }

    if result.permission == Permission::Denied {
        process::exit(EXIT_DENIED);
    }
}

fn run_check_env(ctx: &Context, path: &Path, pairs: &[String], json: bool) {
    let mut changes = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                changes.insert(key.trim().to_string(), value.to_string());
            }
            _ => {
                eprintln!("Error: expected KEY=VALUE, got '{}'", pair);
                process::exit(1);
            }
        }
    }

    let result = ctx
        .policy()
        .validate_env_file_changes(&ctx.resolve(path), &changes);

    if json {
        print_json(&result);
    } else {
        for (key, detail) in &result.details {
            println!("{} ({:?}): {}", key, detail.variable_type, detail.permission);
            if let Some(suggestion) = &detail.suggestion {
                println!("  {}", suggestion);
            }
        }
    }

    if !result.is_valid() {
        process::exit(EXIT_DENIED);
    }
}

fn run_check_name(ctx: &Context, name: &str, json: bool) {
    let result = ctx.policy().validate_image_directory_name(name);

    if json {
        print_json(&result);
    } else if result.is_valid {
        println!("'{}' is a valid image directory name", name);
    } else {
        println!("'{}' is not valid ({})", name, result.format_description);
        for error in &result.errors {
            println!("  error: {}", error);
        }
        if let Some(suggested) = &result.suggested_name {
            println!("  suggested: {}", suggested);
        }
    }

    if !result.is_valid {
        process::exit(1);
    }
}

fn run_explain(violation: ViolationKind, json: bool) {
    let guidance = guidance_for(violation);
    if json {
        print_json(&guidance);
    } else {
        println!("{}", guidance.to_human());
    }
}

fn run_ports_check(ctx: &Context, ports: &[u16], udp: bool, connect: bool, json: bool) {
    let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };
    let mode = if connect { CheckMode::Connect } else { CheckMode::Bind };
    let engine = ctx.ports(mode);

    let results = match engine.check_ports(ports, protocol) {
        Ok(r) => r,
        Err(e) => fail(e.into()),
    };

    let mut report = Vec::new();
    for check in results {
        let conflict = (!check.available).then(|| {
            let conflict = engine.detect_port_conflict(check.port, protocol);
            let window = engine.search_window();
            let min = check.port.saturating_add(1);
            let max = check.port.saturating_add(window);
            let alternative = engine
                .find_available_port(min, min, max, protocol)
                .ok();
            let suggestions = get_resolution_suggestions(&conflict, alternative);
            (conflict, suggestions)
        });

        if !json {
            match &conflict {
                None => println!("{}/{}: free", check.port, protocol),
                Some((info, suggestions)) => {
                    let holder = info
                        .process
                        .as_ref()
                        .map(|p| format!(" by {} (pid {})", p.process_name, p.process_id))
                        .unwrap_or_default();
                    println!(
                        "{}/{}: in use{} [{:?}]",
                        check.port, protocol, holder, info.severity
                    );
                    for s in suggestions {
                        println!("  - {}", s.action);
                    }
                }
            }
        }

        report.push(serde_json::json!({
            "check": check,
            "conflict": conflict.as_ref().map(|(c, _)| c),
            "suggestions": conflict.as_ref().map(|(_, s)| s),
        }));
    }

    if json {
        print_json(&report);
    }
}

fn run_ports_allocate(ctx: &Context, project_type: ProjectType, roles: Vec<PortRole>, json: bool) {
    let roles = if roles.is_empty() {
        default_roles(project_type)
    } else {
        roles
    };

    let result = match ctx
        .ports(CheckMode::Bind)
        .allocate_project_ports(project_type, &roles)
    {
        Ok(r) => r,
        Err(e) => fail(e.into()),
    };

    if json {
        print_json(&result);
    } else {
        println!("{}", result.summary);
    }

    if !result.is_complete() {
        process::exit(4);
    }
}

fn run_ports_validate(port: u32, privileged: bool, json: bool) {
    let result = validate_port(port, privileged);

    if json {
        print_json(&result);
    } else {
        println!("{}: {}", port, if result.is_valid { "valid" } else { "invalid" });
        for error in &result.errors {
            println!("  error: {}", error);
        }
        for warning in &result.warnings {
            println!("  warning: {}", warning);
        }
        if !result.suggested_alternatives.is_empty() {
            let alts: Vec<String> = result
                .suggested_alternatives
                .iter()
                .map(|p| p.to_string())
                .collect();
            println!("  alternatives: {}", alts.join(", "));
        }
    }

    if !result.is_valid {
        process::exit(4);
    }
}

fn run_policy(ctx: &Context, json: bool) {
    let snapshot = ctx.policy().snapshot();

    if json {
        print_json(&snapshot);
        return;
    }

    println!("Protected files: {}", snapshot.protected_patterns.join(", "));
    println!("Runtime variables: {}", snapshot.runtime_variables.join(", "));
    println!("File rules:");
    for rule in snapshot.file_rules {
        println!("  {:?} {} -> {}", rule.class, rule.operation, rule.permission);
    }
    println!("Directory rules:");
    for rule in snapshot.directory_rules {
        println!("  {:?} {} -> {}", rule.class, rule.operation, rule.permission);
    }
}

fn run_config_show(ctx: &Context) {
    match ctx.config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            process::exit(1);
        }
    }
}
