use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use tempfile::TempDir;

fn tatib(db: &Path, uploads: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tatib").expect("binary builds");
    cmd.arg("--db").arg(db).arg("--uploads").arg(uploads);
    cmd
}

fn run_ok(db: &Path, uploads: &Path, args: &[&str]) -> Result<String> {
    let output = tatib(db, uploads).args(args).output()?;
    assert!(
        output.status.success(),
        "command {:?} failed\nstdout: {}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[test]
fn backup_and_restore_between_databases() -> Result<()> {
    let dir = TempDir::new()?;
    let db_a = dir.path().join("a.sqlite3");
    let db_b = dir.path().join("b.sqlite3");
    let uploads_a = dir.path().join("uploads_a");
    let uploads_b = dir.path().join("uploads_b");
    let out_dir = dir.path().join("out");
    let out_flag = out_dir.to_string_lossy().into_owned();

    let stdout = run_ok(&db_a, &uploads_a, &["db", "migrate"])?;
    assert!(stdout.contains("Migrations up to date."));

    let stdout = run_ok(
        &db_a,
        &uploads_a,
        &[
            "school",
            "create",
            "--name",
            "SMP Asal",
            "--address",
            "Jl. Merdeka 1",
            "--admin-username",
            "admin1",
            "--admin-password",
            "rahasia123",
        ],
    )?;
    assert!(stdout.contains("Created school SMP Asal"));

    let stdout = run_ok(
        &db_a,
        &uploads_a,
        &["backup", "--school", "SMP Asal", "--out", &out_flag],
    )?;
    let archive_path = stdout.trim().to_string();
    assert!(archive_path.ends_with(".zip"));
    assert!(Path::new(&archive_path).is_file());

    run_ok(
        &db_b,
        &uploads_b,
        &[
            "school",
            "create",
            "--name",
            "SMP Tujuan",
            "--admin-username",
            "admin2",
            "--admin-password",
            "rahasia123",
        ],
    )?;

    let stdout = run_ok(
        &db_b,
        &uploads_b,
        &["restore", "--school", "SMP Tujuan", "--file", &archive_path],
    )?;
    // The source school had no roster yet; its admin comes back locked.
    assert!(stdout.contains("Restored 0 students"));
    assert!(stdout.contains("admin1"));

    let stdout = run_ok(&db_b, &uploads_b, &["school", "list"])?;
    assert!(stdout.contains("SMP Asal"));

    Ok(())
}

#[test]
fn db_status_lists_migrations() -> Result<()> {
    let dir = TempDir::new()?;
    let db = dir.path().join("fresh.sqlite3");
    let uploads = dir.path().join("uploads");

    let stdout = run_ok(&db, &uploads, &["db", "status"])?;
    assert!(stdout.contains("pending"));
    assert!(!stdout.contains("applied"));

    run_ok(&db, &uploads, &["db", "migrate"])?;

    let stdout = run_ok(&db, &uploads, &["db", "status"])?;
    assert!(stdout.contains("applied"));
    assert!(!stdout.contains("pending"));

    Ok(())
}
