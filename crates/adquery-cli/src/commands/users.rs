//! user commands - lookups, existence checks and credential checks

use super::{CommandContext, QueryArgs};
use adquery_client::UserQuery;
use anyhow::Result;
use serde_json::json;

pub async fn find_user(ctx: &CommandContext, id: &str, query: &QueryArgs) -> Result<()> {
    let user = ctx.client.find_user(id, &query.to_options()).await?;
    ctx.print(&user)
}

/// Users matching a raw filter, restricted to user objects
pub async fn find_user_by_filter(ctx: &CommandContext, filter: &str, query: &QueryArgs) -> Result<()> {
    let user = ctx
        .client
        .find_user(UserQuery::Filter(filter.to_string()), &query.to_options())
        .await?;
    ctx.print(&user)
}

pub async fn find_users(ctx: &CommandContext, query: &QueryArgs) -> Result<()> {
    let users = ctx.client.find_users(&query.to_options()).await?;
    ctx.print(&users)
}

pub async fn user_exists(ctx: &CommandContext, id: &str, query: &QueryArgs) -> Result<()> {
    let exists = ctx.client.user_exists(id, &query.to_options()).await?;
    ctx.print(&json!({ "user": id, "exists": exists }))
}

/// Prints the outcome and reports failure through the exit status
pub async fn authenticate(ctx: &CommandContext, username: &str, password: &str) -> Result<bool> {
    let outcome = ctx.client.authenticate(username, password).await;

    ctx.print(&json!({
        "username": username,
        "authenticated": outcome.authenticated,
        "error": outcome.error.as_ref().map(|e| json!({
            "code": e.code(),
            "result_code": e.result_code(),
            "message": e.to_string(),
        })),
    }))?;

    Ok(outcome.authenticated)
}
