//! Drupal Migration CLI
//!
//! CLI tool for importing Drupal 7 posts, images and users into WordPress.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use drupal_migrate::config::CONFIG_TEMPLATE;
use drupal_migrate::connectors::{mysql, QueryHooks};
use drupal_migrate::progress::BarProgress;
use drupal_migrate::retry::RetryConfig;
use drupal_migrate::store::dry_run::DryRunStore;
use drupal_migrate::store::wordpress::WordPressStore;
use drupal_migrate::validator::ValidatorRules;
use drupal_migrate::{
    create_source, register_builtin, EntityKind, MigrationConfig, MigrationJob, MigrationStats,
    Pipeline, RowSource, RunMode, SourceContext, TargetStore, TransformRegistry,
};

#[derive(Parser)]
#[command(name = "drupal-migrate")]
#[command(version)]
#[command(about = "Migrate Drupal 7 content into WordPress", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        global = true,
        env = "DRUPAL_MIGRATE_CONFIG",
        default_value = "migration.yaml"
    )]
    config: PathBuf,

    /// Dry run mode (don't write to WordPress)
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import Drupal records into WordPress
    Import {
        /// What to import
        #[arg(value_enum)]
        entity: ImportEntity,

        #[command(flatten)]
        args: ImportArgs,
    },

    /// Rewrite embedded Drupal image URLs in migrated posts
    Validate {
        /// What to validate
        #[arg(value_enum)]
        entity: ValidateEntity,

        /// Rows per page (-1 = default)
        #[arg(long, allow_negative_numbers = true)]
        page_size: Option<i64>,
    },

    /// Validate configuration file
    Check {
        /// Also open both database connections
        #[arg(long)]
        connect: bool,
    },

    /// Generate example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "migration.yaml")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportEntity {
    Posts,
    Images,
    Users,
}

impl From<ImportEntity> for EntityKind {
    fn from(entity: ImportEntity) -> Self {
        match entity {
            ImportEntity::Posts => Self::Post,
            ImportEntity::Images => Self::Image,
            ImportEntity::Users => Self::User,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ValidateEntity {
    Posts,
}

#[derive(Args)]
struct ImportArgs {
    /// Drupal node types, comma-separated, or `all`
    #[arg(long)]
    entity_type: Option<String>,

    /// Rows per page (-1 = default)
    #[arg(long, allow_negative_numbers = true)]
    page_size: Option<i64>,

    /// Maximum number of rows to import
    #[arg(long)]
    limit: Option<u64>,

    /// Drupal database host
    #[arg(long, env = "D7DB_HOST")]
    d7db_host: Option<String>,

    /// Drupal database user
    #[arg(long, env = "D7DB_USER")]
    d7db_user: Option<String>,

    /// Drupal database password
    #[arg(long, env = "D7DB_PASS", hide_env_values = true)]
    d7db_pass: Option<String>,

    /// Drupal database name
    #[arg(long, env = "D7DB_NAME")]
    d7db_name: Option<String>,

    /// Import rows even if their Drupal id was already migrated
    #[arg(long)]
    allow_duplicates: bool,
}

impl ImportArgs {
    fn apply(self, config: &mut MigrationConfig) {
        if let Some(entity_type) = self.entity_type {
            config.options.entity_type = entity_type;
        }
        if let Some(page_size) = self.page_size {
            config.options.page_size = page_size;
        }
        if self.limit.is_some() {
            config.options.limit = self.limit;
        }
        if self.d7db_host.is_some() {
            config.origin.host = self.d7db_host;
        }
        if self.d7db_user.is_some() {
            config.origin.user = self.d7db_user;
        }
        if self.d7db_pass.is_some() {
            config.origin.password = self.d7db_pass;
        }
        if self.d7db_name.is_some() {
            config.origin.name = self.d7db_name;
        }
        if self.allow_duplicates {
            config.options.skip_migrated = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Import { entity, args } => {
            let mut config = load_config(&cli.config, cli.dry_run)?;
            args.apply(&mut config);
            config.validate()?;
            run_job(config, entity.into(), RunMode::Import).await
        }
        Commands::Validate {
            entity: ValidateEntity::Posts,
            page_size,
        } => {
            let mut config = load_config(&cli.config, cli.dry_run)?;
            if let Some(page_size) = page_size {
                config.options.page_size = page_size;
            }
            config.validate_for_validator()?;
            run_job(config, EntityKind::Post, RunMode::Validate).await
        }
        Commands::Check { connect } => {
            check_config(&cli.config, connect).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { output } => {
            generate_config(&output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &Path, dry_run: bool) -> anyhow::Result<MigrationConfig> {
    info!("Loading configuration from {:?}", path);
    let mut config = MigrationConfig::from_file(path)?;
    if dry_run {
        config.options.dry_run = true;
    }
    Ok(config)
}

async fn run_job(config: MigrationConfig, kind: EntityKind, mode: RunMode) -> anyhow::Result<ExitCode> {
    let retry = RetryConfig::default();

    let wordpress = Arc::new(WordPressStore::connect(&config, &retry).await?);
    let target_pool = wordpress.pool().clone();
    let store: Arc<dyn TargetStore> = if config.options.dry_run {
        info!("Dry run mode - not writing to WordPress");
        Arc::new(DryRunStore::new(wordpress))
    } else {
        wordpress
    };

    let origin = match mode {
        RunMode::Import => Some(mysql::connect(&config.origin_database(), &retry).await?),
        RunMode::Validate => None,
    };
    let ctx = SourceContext {
        origin,
        target: Some(target_pool),
        table_prefix: config.target.table_prefix.clone(),
        hooks: Arc::new(QueryHooks::new()),
    };
    let source: Arc<dyn RowSource> = Arc::from(create_source(kind, mode, &ctx)?);

    let mut transforms = TransformRegistry::new();
    register_builtin(&mut transforms, &config.options);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current page");
            on_interrupt.cancel();
        }
    });

    let mut pipeline = Pipeline::new(source, store, Arc::new(transforms))
        .with_progress(Arc::new(BarProgress::new()))
        .with_cancellation(cancel)
        .skip_migrated(config.options.skip_migrated);
    if mode == RunMode::Validate {
        pipeline = pipeline.with_validator(ValidatorRules::from_options(&config.options.validator)?);
    }

    let mut job = MigrationJob::from_options(kind, mode, &config.options)?;
    let stats = pipeline.run(&mut job).await?;
    print_summary(kind, mode, &stats);

    Ok(ExitCode::from(stats.exit_code()))
}

fn print_summary(kind: EntityKind, mode: RunMode, stats: &MigrationStats) {
    if stats.total == 0 {
        println!("No {} found to {}.", kind.plural(), mode);
        return;
    }

    let title = if stats.cancelled { "Cancelled" } else { "Complete" };
    println!("\n{} {}: {}", kind.plural(), mode, title);
    println!("   Total:            {}", stats.total);
    println!("   Fetched:          {}", stats.fetched);
    println!("   Succeeded:        {}", stats.succeeded);
    if mode == RunMode::Validate {
        println!("   Rewritten:        {}", stats.updated);
    } else {
        println!("   Already migrated: {}", stats.already_migrated);
    }
    println!("   Skipped:          {}", stats.skipped);
    println!("   Failed:           {}", stats.failed);
    println!("   Pages:            {}", stats.pages);
    println!("   Duration:         {:.2}s", stats.duration_secs);
    println!("   Throughput:       {:.0} {}/sec", stats.throughput(), kind.plural());
}

async fn check_config(config_path: &Path, connect: bool) -> anyhow::Result<()> {
    info!("Validating configuration from {:?}", config_path);

    let config = MigrationConfig::from_file(config_path)?;
    config.validate()?;
    let origin = config.origin_database();

    println!("Configuration is valid!");
    println!(
        "   Target:    {}@{}:{}/{} (prefix {})",
        config.target.database.user,
        config.target.database.host,
        config.target.database.port,
        config.target.database.name,
        config.target.table_prefix
    );
    println!(
        "   Origin:    {}@{}:{}/{}",
        origin.user, origin.host, origin.port, origin.name
    );
    println!("   Uploads:   {:?}", config.target.uploads_dir);
    println!("   Import:    {:?}", config.import_path());
    match config.options.validator.first_party_host.as_deref() {
        Some(host) => println!("   Validator: rewrites images on {}", host),
        None => println!("   Validator: not configured"),
    }

    if connect {
        let retry = RetryConfig::no_retry();
        mysql::connect(&config.target.database, &retry).await?;
        println!("   Target database reachable");
        mysql::connect(&origin, &retry).await?;
        println!("   Origin database reachable");
    }

    Ok(())
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{:?} already exists", output);
    }
    std::fs::write(output, CONFIG_TEMPLATE)?;
    println!("Generated configuration: {:?}", output);
    println!(
        "   Edit the file and run: drupal-migrate --config {:?} import users",
        output
    );

    Ok(())
}
