//! Interactive administration console.
//!
//! Every mutation runs through `shield_core::admin`, so each menu action is
//! one complete session against the encrypted store. Prompts that accept
//! free text treat an empty line as cancel; destructive actions require a
//! typed confirmation word.

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use shield_core::admin::{self, MIN_POOL_SIZE};
use shield_core::store::PoolEntry;
use shield_core::{credentials, SecureStore};
use std::io::{BufRead, Write};

pub fn run(store: &SecureStore) -> Result<()> {
    let password = crate::prompt_password_once("Admin password: ")?;
    let mut key = credentials::verify(store, &password)?;
    println!("ReplayShield management console. Empty input cancels a prompt.");

    loop {
        println!();
        println!("  1) list users            6) set block count");
        println!("  2) show password pool    7) remove password");
        println!("  3) show history          8) delete user");
        println!("  4) create user           9) dump store");
        println!("  5) add password         10) change admin password");
        println!("  q) quit");
        let choice = read_line("> ")?;
        let outcome = match choice.as_str() {
            "1" => list_users(store, &key),
            "2" => show_pool(store, &key),
            "3" => show_history(store, &key),
            "4" => create_user(store, &key),
            "5" => add_password(store, &key),
            "6" => set_block_count(store, &key),
            "7" => remove_password(store, &key),
            "8" => delete_user(store, &key),
            "9" => dump(store, &key),
            "10" => match change_admin_password(store) {
                Ok(new_key) => {
                    key = new_key;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            "q" | "Q" => return Ok(()),
            "" => continue,
            other => Err(anyhow!("unknown choice '{other}'")),
        };
        if let Err(e) = outcome {
            println!("error: {e}");
        }
    }
}

fn list_users(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let users = admin::list_users(store, key)?;
    if users.is_empty() {
        println!("no users");
        return Ok(());
    }
    println!("{:<24} {:>11}", "username", "block_count");
    for user in users {
        println!("{:<24} {:>11}", user.username, user.block_count);
    }
    Ok(())
}

fn show_pool(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let Some(username) = read_optional("Username: ")? else {
        return Ok(());
    };
    let entries = admin::list_pool(store, key, &username)?;
    print!("{}", pool_table(&entries));
    Ok(())
}

fn show_history(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let Some(username) = read_optional("Username: ")? else {
        return Ok(());
    };
    let entries = admin::list_history(store, key, &username)?;
    if entries.is_empty() {
        println!("no successful authentications recorded");
        return Ok(());
    }
    println!("{:<6} {:<12} {}", "id", "hint", "when");
    for entry in entries {
        println!(
            "{:<6} {:<12} {}",
            entry.id,
            entry.pw_hint,
            format_timestamp(entry.created_at)
        );
    }
    Ok(())
}

fn create_user(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let Some(username) = read_optional("New username: ")? else {
        return Ok(());
    };
    let Some(block_count) = read_optional("Block count: ")? else {
        return Ok(());
    };
    let block_count: u32 = block_count
        .parse()
        .map_err(|_| anyhow!("block count must be a non-negative integer"))?;

    println!("Enter at least {MIN_POOL_SIZE} pool passwords; empty line finishes.");
    let mut passwords: Vec<String> = Vec::new();
    loop {
        let prompt = format!("Password {}: ", passwords.len() + 1);
        let pw = rpassword::prompt_password(&prompt)?;
        if pw.is_empty() {
            break;
        }
        passwords.push(pw);
    }
    let refs: Vec<&str> = passwords.iter().map(String::as_str).collect();
    admin::create_user(store, key, &username, block_count, &refs)?;
    println!("created user '{username}'");
    Ok(())
}

fn add_password(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let Some(username) = read_optional("Username: ")? else {
        return Ok(());
    };
    let pw = rpassword::prompt_password("New pool password: ")?;
    if pw.is_empty() {
        println!("cancelled");
        return Ok(());
    }
    admin::add_password(store, key, &username, &pw)?;
    println!("added");
    Ok(())
}

fn remove_password(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let Some(username) = read_optional("Username: ")? else {
        return Ok(());
    };
    let entries = admin::list_pool(store, key, &username)?;
    print!("{}", pool_table(&entries));
    let Some(id) = read_optional("Entry id to remove: ")? else {
        return Ok(());
    };
    let id: i64 = id.parse().map_err(|_| anyhow!("id must be an integer"))?;
    admin::remove_password(store, key, &username, id)?;
    println!("removed");
    Ok(())
}

fn set_block_count(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let Some(username) = read_optional("Username: ")? else {
        return Ok(());
    };
    let Some(value) = read_optional("New block count: ")? else {
        return Ok(());
    };
    let block_count: u32 = value
        .parse()
        .map_err(|_| anyhow!("block count must be a non-negative integer"))?;
    admin::set_block_count(store, key, &username, block_count)?;
    println!("updated");
    Ok(())
}

fn delete_user(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let Some(username) = read_optional("Username to delete: ")? else {
        return Ok(());
    };
    let confirm = read_line(&format!(
        "This removes '{username}' with their pool and history. Type DELETE to confirm: "
    ))?;
    if confirm != "DELETE" {
        println!("cancelled");
        return Ok(());
    }
    if admin::delete_user(store, key, &username)? {
        println!("deleted '{username}'");
    } else {
        println!("no such user");
    }
    Ok(())
}

fn dump(store: &SecureStore, key: &shield_core::AdminKey) -> Result<()> {
    let dump = admin::dump(store, key)?;
    println!("-- user_config ({}) --", dump.users.len());
    for user in &dump.users {
        println!("{:<24} block_count={}", user.username, user.block_count);
    }
    println!("-- password_pool ({}) --", dump.pool.len());
    print!("{}", pool_table(&dump.pool));
    println!("-- password_history ({}) --", dump.history.len());
    for entry in &dump.history {
        println!(
            "{:<6} {:<24} {:<12} {}",
            entry.id,
            entry.username,
            entry.pw_hint,
            format_timestamp(entry.created_at)
        );
    }
    Ok(())
}

fn change_admin_password(store: &SecureStore) -> Result<shield_core::AdminKey> {
    let current = rpassword::prompt_password("Current admin password: ")?;
    let new = rpassword::prompt_password("New admin password: ")?;
    if new.is_empty() {
        return Err(anyhow!("new password must not be empty"));
    }
    let confirm = rpassword::prompt_password("Confirm new password: ")?;
    if new != confirm {
        return Err(anyhow!("passwords do not match"));
    }
    let key = credentials::change_admin_password(store, &current, &new)?;
    println!("admin password changed");
    Ok(key)
}

fn pool_table(entries: &[PoolEntry]) -> String {
    if entries.is_empty() {
        return "empty pool\n".to_string();
    }
    let mut out = format!(
        "{:<6} {:<12} {:>9} {:>8} {}\n",
        "id", "hint", "hit_count", "blocked", "last_use"
    );
    for entry in entries {
        out.push_str(&format!(
            "{:<6} {:<12} {:>9} {:>8} {}\n",
            entry.id,
            entry.pw_hint,
            entry.hit_count,
            if entry.blocked { "yes" } else { "no" },
            format_timestamp(entry.last_use)
        ));
    }
    out
}

fn format_timestamp(millis: i64) -> String {
    if millis == 0 {
        return "never".to_string();
    }
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => format!("{millis}?"),
    }
}

pub(crate) fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn read_optional(prompt: &str) -> Result<Option<String>> {
    let line = read_line(prompt)?;
    if line.is_empty() {
        println!("cancelled");
        return Ok(None);
    }
    Ok(Some(line))
}
