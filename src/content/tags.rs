//! Grouping posts by tag for per-tag index pages.

use super::page::Page;
use super::post::Post;
use super::Meta;
use crate::urls::permalink_to_filename;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

/// Posts keyed by tag name, each list newest first.
#[derive(Debug, Default, Clone)]
pub struct TagIndex {
    tags: BTreeMap<String, Vec<Arc<Post>>>,
}

impl TagIndex {
    /// Group `posts`, which are expected newest first.
    ///
    /// A tag spelled in a different case than one already seen joins the
    /// existing lower-case or title-case spelling.
    pub fn build(posts: &[Arc<Post>]) -> Self {
        let mut tags: BTreeMap<String, Vec<Arc<Post>>> = BTreeMap::new();
        for post in posts {
            for tag in &post.tags {
                let key = normalize(&tags, tag);
                let list = tags.entry(key).or_default();
                if !list.iter().any(|p| Arc::ptr_eq(p, post)) {
                    list.push(Arc::clone(post));
                }
            }
        }
        Self { tags }
    }

    /// Tag names in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    pub fn posts(&self, tag: &str) -> &[Arc<Post>] {
        self.tags.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

fn normalize(tags: &BTreeMap<String, Vec<Arc<Post>>>, tag: &str) -> String {
    if tags.contains_key(tag) {
        return tag.to_string();
    }
    let lower = tag.to_lowercase();
    if tags.contains_key(&lower) {
        return lower;
    }
    let title = title_case(tag);
    if tags.contains_key(&title) {
        return title;
    }
    tag.to_string()
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start = true;
    for c in s.chars() {
        if start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        start = c.is_whitespace();
    }
    out
}

/// Fill a tag permalink template: `:lctag` is the lower-cased tag.
pub fn tag_permalink(template: &str, tag: &str) -> String {
    template.replace(":lctag", &tag.to_lowercase()).replace(":tag", tag)
}

/// Build the page listing `posts` under `tag`.
///
/// Meta carries `title` and `tag` (both the tag name) and `posts`, a list of
/// `{title, url, date}` maps.
pub fn tag_page(tag: &str, posts: &[Arc<Post>], permalink: &str) -> Page {
    let mut meta = Meta::new();
    meta.insert("title".to_string(), Value::from(tag));
    meta.insert("tag".to_string(), Value::from(tag));
    let list = posts
        .iter()
        .map(|post| {
            let mut item = Mapping::new();
            item.insert("title".into(), post.title().into());
            item.insert("url".into(), post.url().into());
            item.insert("date".into(), post.date.format("%Y-%m-%d").to_string().into());
            Value::Mapping(item)
        })
        .collect();
    meta.insert("posts".to_string(), Value::Sequence(list));

    let modified = posts
        .iter()
        .map(|p| p.page.modified)
        .max()
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let filename = permalink_to_filename(&tag_permalink(permalink, tag));
    Page::new(&PathBuf::new(), meta, tag.to_string(), filename, modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::metafile::get_str;
    use chrono::NaiveDate;

    fn post(name: &str, day: u32, tags: &[&str]) -> Arc<Post> {
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut meta = Meta::new();
        meta.insert("title".to_string(), Value::from(name));
        let page = Page::new(
            &PathBuf::from(format!("posts/{}.md", name)),
            meta,
            String::new(),
            format!("blog/{}/index.html", name),
            SystemTime::UNIX_EPOCH,
        );
        Arc::new(Post { page, date, tags: tags.iter().map(|t| t.to_string()).collect() })
    }

    #[test]
    fn test_groups_posts_by_tag() {
        let posts = vec![post("c", 3, &["rust"]), post("b", 2, &["rust", "web"]), post("a", 1, &["web"])];
        let index = TagIndex::build(&posts);

        assert_eq!(index.tags().collect::<Vec<_>>(), ["rust", "web"]);
        let rust: Vec<_> = index.posts("rust").iter().map(|p| p.title().to_string()).collect();
        assert_eq!(rust, ["c", "b"]);
        assert!(index.posts("missing").is_empty());
    }

    #[test]
    fn test_case_variants_merge() {
        let posts = vec![post("b", 2, &["rust"]), post("a", 1, &["Rust"])];
        let index = TagIndex::build(&posts);
        assert_eq!(index.len(), 1);
        assert_eq!(index.posts("rust").len(), 2);

        let posts = vec![post("b", 2, &["Web Dev"]), post("a", 1, &["web dev"])];
        let index = TagIndex::build(&posts);
        // "web dev" is new, its title-case form already exists.
        assert_eq!(index.tags().collect::<Vec<_>>(), ["Web Dev"]);
    }

    #[test]
    fn test_duplicate_tag_on_one_post() {
        let posts = vec![post("a", 1, &["rust", "rust"])];
        assert_eq!(TagIndex::build(&posts).posts("rust").len(), 1);
    }

    #[test]
    fn test_tag_permalink() {
        assert_eq!(tag_permalink("tags/:lctag/", "Rust"), "tags/rust/");
        assert_eq!(tag_permalink("topics/:tag.html", "Rust"), "topics/Rust.html");
    }

    #[test]
    fn test_tag_page() {
        let posts = vec![post("b", 2, &["rust"])];
        let page = tag_page("Rust", &posts, "tags/:lctag/");
        assert_eq!(page.filename, "tags/rust/index.html");
        assert_eq!(page.url, "/tags/rust/");
        assert_eq!(page.title(), "Rust");
        assert_eq!(get_str(&page.meta, "tag"), Some("Rust"));
        match page.meta.get("posts") {
            Some(Value::Sequence(items)) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].get("url").and_then(Value::as_str), Some("/blog/b/"));
                assert_eq!(items[0].get("date").and_then(Value::as_str), Some("2024-01-02"));
            }
            other => panic!("unexpected posts value: {:?}", other),
        }
    }
}
