//! generic commands - raw searches, tombstones and server metadata

use super::{CommandContext, QueryArgs};
use anyhow::{bail, Result};

pub async fn find(ctx: &CommandContext, query: &QueryArgs) -> Result<()> {
    if query.filter.is_none() {
        bail!("find requires --filter");
    }
    let result = ctx.client.find(&query.to_options()).await?;
    ctx.print(&result)
}

pub async fn deleted(ctx: &CommandContext, query: &QueryArgs) -> Result<()> {
    let entries = ctx.client.find_deleted_objects(&query.to_options()).await?;
    ctx.print(&entries)
}

pub async fn root_dse(ctx: &CommandContext, url: Option<&str>, attributes: &[String]) -> Result<()> {
    let attributes = (!attributes.is_empty()).then(|| attributes.to_vec());
    let dse = ctx.client.get_root_dse(url, attributes).await?;
    ctx.print(&dse)
}
