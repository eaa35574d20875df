use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use tatib_lib::assets::AssetStore;
use tatib_lib::backup::{create_backup, restore_backup};
use tatib_lib::db::open_sqlite_pool;
use tatib_lib::migrate::{apply_migrations, migration_status};
use tatib_lib::{schools, users};

#[derive(Debug, Parser)]
#[command(name = "tatib", about = "School discipline tracker", version)]
struct Cli {
    /// Database file (defaults to the per-user data directory).
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Directory holding uploaded photos and logos.
    #[arg(long, value_name = "DIR")]
    uploads: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance.
    #[command(subcommand)]
    Db(DbCommand),
    /// Tenant management (super-admin operations).
    #[command(subcommand)]
    School(SchoolCommand),
    /// Member account operations.
    #[command(subcommand)]
    Member(MemberCommand),
    /// Export one school into a zip archive.
    Backup {
        /// School name.
        #[arg(long)]
        school: String,
        /// Output directory (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Merge a zip archive back into one school.
    Restore {
        /// Target school name.
        #[arg(long)]
        school: String,
        /// Archive produced by `backup`.
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending migrations.
    Migrate,
    /// List migrations and whether each is applied.
    Status,
}

#[derive(Debug, Subcommand)]
enum SchoolCommand {
    /// Create a school together with its first admin account.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        admin_username: String,
        #[arg(long)]
        admin_password: String,
    },
    /// List registered schools.
    List,
}

#[derive(Debug, Subcommand)]
enum MemberCommand {
    /// Redeem a one-time reset token and set a new password.
    Reset {
        #[arg(long)]
        username: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() {
    tatib_lib::init_logging();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let db_path = match cli.db {
        Some(path) => path,
        None => default_data_dir()?.join("tatib.sqlite3"),
    };
    let uploads = match cli.uploads {
        Some(path) => path,
        None => default_data_dir()?.join("uploads"),
    };
    let assets = AssetStore::new(uploads);
    let pool = open_sqlite_pool(&db_path).await?;

    match cli.command {
        Commands::Db(DbCommand::Status) => {
            for (version, applied) in migration_status(&pool).await? {
                let state = if applied { "applied" } else { "pending" };
                println!("{version}\t{state}");
            }
        }
        Commands::Db(DbCommand::Migrate) => {
            apply_migrations(&pool).await?;
            println!("Migrations up to date.");
        }
        Commands::School(SchoolCommand::Create {
            name,
            address,
            admin_username,
            admin_password,
        }) => {
            apply_migrations(&pool).await?;
            let school = schools::create_school(
                &pool,
                &name,
                address.as_deref(),
                &admin_username,
                &admin_password,
            )
            .await?;
            println!("Created school {} ({})", school.name, school.id);
        }
        Commands::School(SchoolCommand::List) => {
            apply_migrations(&pool).await?;
            for school in schools::list(&pool).await? {
                println!("{}\t{}", school.id, school.name);
            }
        }
        Commands::Member(MemberCommand::Reset {
            username,
            token,
            password,
        }) => {
            apply_migrations(&pool).await?;
            if users::redeem_reset_token(&pool, &username, &token, &password).await? {
                println!("Password updated for {username}.");
            } else {
                bail!("reset token rejected for {username}");
            }
        }
        Commands::Backup { school, out } => {
            apply_migrations(&pool).await?;
            let school = require_school(&pool, &school).await?;
            let bytes = create_backup(&pool, &assets, &school.id).await?;

            let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
            let file_name = format!("backup-{}-{timestamp}.zip", slugify(&school.name));
            let out_dir = out.unwrap_or_else(|| PathBuf::from("."));
            fs::create_dir_all(&out_dir)
                .with_context(|| format!("create output directory {}", out_dir.display()))?;
            let path = out_dir.join(file_name);
            fs::write(&path, &bytes)
                .with_context(|| format!("write archive {}", path.display()))?;
            println!("{}", path.display());
        }
        Commands::Restore { school, file } => {
            apply_migrations(&pool).await?;
            let school = require_school(&pool, &school).await?;
            let bytes =
                fs::read(&file).with_context(|| format!("read archive {}", file.display()))?;
            let summary = restore_backup(&pool, &assets, &school.id, &bytes).await?;
            println!(
                "Restored {} students and {} violations into {}.",
                summary.students_created, summary.violations_created, school.name
            );
            if !summary.locked_members.is_empty() {
                println!("Recreated accounts awaiting a password reset:");
                for member in &summary.locked_members {
                    println!("  {}\ttoken: {}", member.username, member.reset_token);
                }
            }
        }
    }

    Ok(())
}

async fn require_school(pool: &SqlitePool, name: &str) -> Result<schools::School> {
    schools::find_by_name(pool, name)
        .await?
        .with_context(|| format!("no school named {name:?}"))
}

fn default_data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .context("could not resolve the user data directory")?
        .join("tatib"))
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
