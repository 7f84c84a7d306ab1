use anyhow::{Context as AnyhowContext, Result};
use pocket_protocol::{normalize_tags, Item};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Reads a JSON array of items, normalizing their tags. Duplicate ids are rejected.
pub fn load_items(path: &Path) -> Result<Vec<Item>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read items file {}", path.display()))?;
    let mut items: Vec<Item> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid items JSON in {}", path.display()))?;
    for item in &mut items {
        item.tags = normalize_tags(&item.tags);
    }

    let mut seen = HashSet::new();
    if let Some(dup) = items.iter().find(|item| !seen.insert(item.id.as_str())) {
        anyhow::bail!("Duplicate item id '{}' in {}", dup.id, path.display());
    }
    log::debug!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}

/// Writes items back, replacing the file only once the new content is complete.
pub fn save_items(path: &Path, items: &[Item]) -> Result<()> {
    let body = serde_json::to_string_pretty(items).context("Failed to serialize items")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
