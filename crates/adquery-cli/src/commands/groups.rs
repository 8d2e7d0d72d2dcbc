//! group commands - lookups and membership in both directions

use super::{CommandContext, QueryArgs};
use anyhow::Result;
use serde_json::json;

pub async fn find_group(ctx: &CommandContext, name: &str, query: &QueryArgs) -> Result<()> {
    let group = ctx.client.find_group(name, &query.to_options()).await?;
    ctx.print(&group)
}

pub async fn find_groups(ctx: &CommandContext, query: &QueryArgs) -> Result<()> {
    let groups = ctx.client.find_groups(&query.to_options()).await?;
    ctx.print(&groups)
}

pub async fn group_exists(ctx: &CommandContext, name: &str, query: &QueryArgs) -> Result<()> {
    let exists = ctx.client.group_exists(name, &query.to_options()).await?;
    ctx.print(&json!({ "group": name, "exists": exists }))
}

/// Groups a user belongs to, transitively
pub async fn memberships(ctx: &CommandContext, user: &str, query: &QueryArgs) -> Result<()> {
    let groups = ctx
        .client
        .get_group_membership_for_user(user, &query.to_options())
        .await?;
    ctx.print(&groups)
}

/// Groups a group belongs to, transitively
pub async fn group_memberships(ctx: &CommandContext, group: &str, query: &QueryArgs) -> Result<()> {
    let groups = ctx
        .client
        .get_group_membership_for_group(group, &query.to_options())
        .await?;
    ctx.print(&groups)
}

/// Users of a group, expanding nested groups
pub async fn members(ctx: &CommandContext, group: &str, query: &QueryArgs) -> Result<()> {
    let users = ctx
        .client
        .get_users_for_group(group, &query.to_options())
        .await?;
    ctx.print(&users)
}

pub async fn member_of(ctx: &CommandContext, user: &str, group: &str, query: &QueryArgs) -> Result<()> {
    let member = ctx
        .client
        .is_user_member_of(user, group, &query.to_options())
        .await?;
    ctx.print(&json!({ "user": user, "group": group, "member": member }))
}
