//! Wiki reader: navigation tree and pages with their table of contents

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::storage::models::{TocItem, WikiNavItem, WikiNavigation, WikiPageDetail};
use crate::storage::wiki::WikiPageInfo;
use crate::storage::Database;

/// Read side of a repository's generated wiki
pub struct WikiReader {
    db: Database,
}

impl WikiReader {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Pages nested under their parent slug, siblings by order
    pub fn get_navigation(&self, repo_id: &str) -> Result<WikiNavigation> {
        let pages = self.db.list_wiki_pages(repo_id)?;
        Ok(build_nav_tree(&pages))
    }

    /// A page with the table of contents of its markdown, or `None`
    pub fn get_page(&self, repo_id: &str, slug: &str) -> Result<Option<WikiPageDetail>> {
        Ok(self.db.get_wiki_page(repo_id, slug)?.map(|page| {
            let table_of_contents = extract_toc(&page.content);
            WikiPageDetail { page, table_of_contents }
        }))
    }
}

/// Root items are the pages with an empty parent slug. Pages whose parent
/// does not exist are left out.
pub fn build_nav_tree(pages: &[WikiPageInfo]) -> WikiNavigation {
    let mut by_parent: HashMap<&str, Vec<&WikiPageInfo>> = HashMap::new();
    for page in pages {
        by_parent.entry(page.parent_slug.as_str()).or_default().push(page);
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by_key(|p| p.order);
    }

    let mut visited = HashSet::new();
    WikiNavigation {
        items: nav_children("", &by_parent, &mut visited),
    }
}

fn nav_children<'a>(
    parent: &str,
    by_parent: &HashMap<&str, Vec<&'a WikiPageInfo>>,
    visited: &mut HashSet<&'a str>,
) -> Vec<WikiNavItem> {
    let Some(siblings) = by_parent.get(parent) else {
        return Vec::new();
    };

    let mut items = Vec::with_capacity(siblings.len());
    for &page in siblings {
        // A slug appears once even if parent links form a cycle
        if !visited.insert(page.slug.as_str()) {
            continue;
        }
        items.push(WikiNavItem {
            slug: page.slug.clone(),
            title: page.title.clone(),
            order: page.order,
            children: nav_children(&page.slug, by_parent, visited),
        });
    }
    items
}

/// Markdown headings `#` through `######` that start a line
pub fn extract_toc(content: &str) -> Vec<TocItem> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let level = line.chars().take_while(|&c| c == '#').count();
            if !(1..=6).contains(&level) {
                return None;
            }
            let title = line.trim_start_matches('#').trim();
            if title.is_empty() {
                return None;
            }
            Some(TocItem {
                id: heading_anchor(title),
                title: title.to_string(),
                level: level as u8,
            })
        })
        .collect()
}

/// Lowercase, spaces to dashes, then only `[a-z0-9-]` kept
fn heading_anchor(title: &str) -> String {
    title
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}
