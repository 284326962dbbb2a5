//! tributary-db — inspect and edit the mapping store from the shell.
//!
//! Usage: tributary-db <db_path> <command>
//!   list                    all users and their destination playlist ids
//!   show <user>             one user's mapping document as JSON
//!   delete <user> <dest>    remove one mapping
//!   stats                   user and mapping counts

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tributary::mapping_db::MappingDb;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage();
    }

    let path = Path::new(&args[1]);
    if !path.exists() {
        eprintln!("No database at {}", path.display());
        std::process::exit(1);
    }
    let db = redb::Database::open(path).unwrap_or_else(|e| {
        eprintln!("Failed to open redb at {}: {}", path.display(), e);
        std::process::exit(1);
    });
    let db = MappingDb::new(Arc::new(db)).unwrap_or_else(|e| {
        eprintln!("Failed to open mappings table: {e}");
        std::process::exit(1);
    });

    let result = match args[2].as_str() {
        "list" => cmd_list(&db),
        "show" if args.len() == 4 => cmd_show(&db, &args[3]),
        "delete" if args.len() == 5 => cmd_delete(&db, &args[3], &args[4]),
        "stats" => cmd_stats(&db),
        _ => usage(),
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn usage() -> ! {
    eprintln!("Usage: tributary-db <db_path> (list | show <user> | delete <user> <dest> | stats)");
    std::process::exit(1);
}

fn cmd_list(db: &MappingDb) -> tributary::Result<()> {
    let all = db.all_mappings()?;
    for (user, document) in all {
        let destinations: Vec<&String> = document.keys().collect();
        println!("{}", json!({"user": user, "destinations": destinations}));
    }
    Ok(())
}

fn cmd_show(db: &MappingDb, user: &str) -> tributary::Result<()> {
    let document = db.user_mappings(user)?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn cmd_delete(db: &MappingDb, user: &str, destination: &str) -> tributary::Result<()> {
    db.delete_mapping(user, destination)?;
    println!("{}", json!({"deleted": destination, "user": user}));
    Ok(())
}

fn cmd_stats(db: &MappingDb) -> tributary::Result<()> {
    let all = db.all_mappings()?;
    let mappings: usize = all.values().map(|d| d.len()).sum();
    println!("{}", json!({"users": all.len(), "mappings": mappings}));
    Ok(())
}
