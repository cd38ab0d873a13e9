//! Credit administration commands: grant and show.

use anyhow::{bail, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use forge_core::ledger::repository::CreditLedger;
use forge_types::user::{Principal, User};

/// Add `amount` credits to a user.
///
/// The user is created on the fly (zero balance, placeholder email) so that
/// credits can be granted before the first sign-in.
pub async fn grant<L: CreditLedger>(
    ledger: &L,
    external_id: &str,
    amount: i64,
    json: bool,
) -> Result<()> {
    if amount <= 0 {
        bail!("Amount must be positive, got {amount}");
    }
    let user = ledger
        .get_or_create_user(&Principal::new(external_id))
        .await?;
    let balance = ledger.increment(&user.id, amount).await?;
    tracing::info!(user_id = %user.id, amount, balance, "Credits granted from CLI");

    if json {
        let out = serde_json::json!({
            "user_id": user.id,
            "external_id": user.external_id,
            "granted": amount,
            "credits": balance,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Granted {} credits to {} (balance: {})",
        style("✓").green().bold(),
        style(amount).bold(),
        style(&user.external_id).cyan(),
        style(balance).bold()
    );
    println!();
    Ok(())
}

/// Print a user's balance.
pub async fn show<L: CreditLedger>(ledger: &L, external_id: &str, json: bool) -> Result<()> {
    let Some(user) = ledger.find_by_external_id(external_id).await? else {
        bail!("No user with external id '{external_id}'");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    println!();
    println!("{}", user_table(&user));
    println!();
    Ok(())
}

fn user_table(user: &User) -> Table {
    let balance_color = if user.credits > 0 {
        Color::Green
    } else {
        Color::Red
    };

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("External ID").fg(Color::White),
        Cell::new("Email").fg(Color::White),
        Cell::new("Credits").fg(Color::White),
        Cell::new("Since").fg(Color::White),
    ]);
    table.add_row(vec![
        Cell::new(&user.external_id),
        Cell::new(&user.email),
        Cell::new(user.credits).fg(balance_color),
        Cell::new(user.created_at.format("%Y-%m-%d %H:%M").to_string()),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_table_lists_balance() {
        let mut user = User::new_from_principal(&Principal::new("gm-1"));
        user.credits = 7;
        let rendered = user_table(&user).to_string();
        assert!(rendered.contains("gm-1"));
        assert!(rendered.contains('7'));
    }
}
