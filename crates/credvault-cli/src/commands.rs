use std::io::Write;

use color_eyre::Result;
use credvault_core::credentials::{CredentialRepository, TenantSelection, TenantToken};

use crate::cli::{AppCommand, SelectionCommand, TokenCommand};

fn repo_err(err: impl std::fmt::Display) -> color_eyre::Report {
    color_eyre::eyre::eyre!(err.to_string())
}

/// Execute an app config subcommand.
pub async fn handle_app<R: CredentialRepository>(
    cmd: AppCommand,
    repo: &R,
    out: &mut impl Write,
) -> Result<()> {
    match cmd {
        AppCommand::Set { app_id, app_secret } => {
            repo.put_app_config(&app_id, &app_secret)
                .await
                .map_err(repo_err)?;
            writeln!(out, "Stored app config for {app_id}.")?;
        }
        AppCommand::Show { reveal } => match repo.get_app_config().await.map_err(repo_err)? {
            Some(app) => {
                writeln!(out, "app id:     {}", app.app_id)?;
                writeln!(out, "app secret: {}", display_secret(&app.app_secret, reveal))?;
            }
            None => writeln!(
                out,
                "App is not configured. Set it with \
                 `credvault app set --app-id <id> --app-secret <secret>`."
            )?,
        },
    }
    Ok(())
}

/// Execute a tenant token subcommand. `now_ms` anchors relative expiry.
pub async fn handle_token<R: CredentialRepository>(
    cmd: TokenCommand,
    repo: &R,
    now_ms: i64,
    out: &mut impl Write,
) -> Result<()> {
    match cmd {
        TokenCommand::Set {
            tenant,
            access_token,
            token_type,
            expires_in,
        } => {
            let expires_at = now_ms.saturating_add(expires_in.saturating_mul(1_000));
            repo.put_tenant_token(&tenant, &TenantToken::new(access_token, token_type), expires_at)
                .await
                .map_err(repo_err)?;
            writeln!(out, "Stored token for {tenant} (expires at {expires_at} ms).")?;
        }
        TokenCommand::Show { tenant, reveal } => {
            match repo.get_tenant_token(&tenant).await.map_err(repo_err)? {
                Some(token) => {
                    writeln!(
                        out,
                        "access token: {}",
                        display_secret(&token.access_token, reveal)
                    )?;
                    if let Some(kind) = token.token_type {
                        writeln!(out, "token type:   {kind}")?;
                    }
                }
                None => writeln!(out, "No valid token for {tenant}. Reconnect the account.")?,
            }
        }
        TokenCommand::Clear { tenant } => {
            repo.delete_tenant_token(&tenant).await.map_err(repo_err)?;
            writeln!(out, "Cleared token for {tenant}.")?;
        }
    }
    Ok(())
}

/// Execute a tenant selection subcommand.
pub async fn handle_selection<R: CredentialRepository>(
    cmd: SelectionCommand,
    repo: &R,
    out: &mut impl Write,
) -> Result<()> {
    match cmd {
        SelectionCommand::Set { tenant, selection } => {
            let selection = TenantSelection {
                business_id: selection.business_id,
                ad_account_id: selection.ad_account_id,
                currency: selection.currency,
                timezone: selection.timezone,
            };
            repo.put_tenant_selection(&tenant, &selection)
                .await
                .map_err(repo_err)?;
            writeln!(out, "Stored selection for {tenant}.")?;
        }
        SelectionCommand::Show { tenant } => {
            match repo.get_tenant_selection(&tenant).await.map_err(repo_err)? {
                Some(selection) => {
                    writeln!(out, "ad account: {}", selection.ad_account_id)?;
                    writeln!(out, "business:   {}", or_dash(&selection.business_id))?;
                    writeln!(out, "currency:   {}", or_dash(&selection.currency))?;
                    writeln!(out, "timezone:   {}", or_dash(&selection.timezone))?;
                }
                None => writeln!(out, "No selection for {tenant}.")?,
            }
        }
    }
    Ok(())
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

/// Mask all but the last four characters unless `reveal` is set.
fn display_secret(secret: &str, reveal: bool) -> String {
    if reveal {
        return secret.to_string();
    }
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(8);
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(8))
}
