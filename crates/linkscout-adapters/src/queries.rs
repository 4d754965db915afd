//! Search query generation from the category template taxonomy.

use linkscout_core::{DiscoveryQuery, PlatformType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub platform_type: PlatformType,
    pub text: String,
}

const WEB2: &[&str] = &[
    r#""create account" "post" "blog" site:blogger.com OR site:wordpress.com OR site:tumblr.com"#,
    r#""sign up" "publish" "write" "post article" high DA"#,
    r#""user registration" "content submission" "publish your story""#,
    r#""create profile" "share your content" "publish article""#,
    r#""guest post" "submit article" "user contribution""#,
    r#"inurl:"/register" "publish" "article" "blog post""#,
    r#"inurl:"/signup" "create content" "share your story""#,
    r#""contribute" "submit content" "user generated""#,
];

const DIRECTORY: &[&str] = &[
    r#""submit your site" "add url" "directory submission""#,
    r#""business directory" "add listing" "submit business""#,
    r#""web directory" "add website" "submit url""#,
    r#"inurl:"/submit" "add your site" "directory""#,
    r#"inurl:"/add-url" OR inurl:"/addurl" OR inurl:"/submit-site""#,
    r#""local directory" "add business" "free listing""#,
    r#""niche directory" "submit site" "add website""#,
    r#""industry directory" "add company" "business listing""#,
];

const BOOKMARK: &[&str] = &[
    r#""social bookmarking" "submit url" "add bookmark""#,
    r#""share link" "bookmark site" "add to favorites""#,
    r#"inurl:"/submit" "bookmark" "share""#,
    r#""link sharing" "submit link" "add url""#,
    r#""bookmark this" "add to bookmarks" "share url""#,
    r#""social sharing" "submit story" "add link""#,
];

const PROFILE: &[&str] = &[
    r#""create profile" "about me" "personal page" high DA"#,
    r#""user profile" "member directory" "professional profile""#,
    r#"inurl:"/profile" "create account" "join community""#,
    r#""author profile" "contributor page" "member profile""#,
    r#""business profile" "company profile" "professional listing""#,
    r#""community member" "user directory" "profile page""#,
];

const FORUM: &[&str] = &[
    r#""forum" "community" "discussion" "signature" high DA"#,
    r#"inurl:"/forum" "register" "join discussion""#,
    r#""message board" "community forum" "discussion board""#,
    r#""Q&A" "questions and answers" "ask question""#,
    r#"site:discourse.org OR site:proboards.com OR site:forumotion.com"#,
    r#""phpBB" OR "vBulletin" OR "SMF" "register""#,
    r#""Stack" "community" "questions" "answers""#,
];

const BLOG: &[&str] = &[
    r#""blog" "comment" "leave a reply" "post comment" high DA"#,
    r#"inurl:"/blog" "comments" "discussion" "reply""#,
    r#""blog post" "comments enabled" "join discussion""#,
    r#""article" "comment section" "share your thoughts""#,
    r#"inurl:"/post" "comments" "discussion" "feedback""#,
    r#""news" "blog" "comment" "opinion" "discussion""#,
];

const WIKI: &[&str] = &[
    r#""wiki" "edit" "contribute" "add content""#,
    r#"inurl:"/wiki" "edit page" "add information""#,
    r#""knowledge base" "contribute" "add article""#,
    r#""documentation" "contribute" "edit page""#,
    r#"site:fandom.com OR site:wikia.com "edit""#,
    r#""user contribution" "wiki" "edit article""#,
];

const QA: &[&str] = &[
    r#""Q&A" "ask question" "answer" "community""#,
    r#""questions and answers" "ask" "answer" "help""#,
    r#"inurl:"/questions" "ask" "answer" "community""#,
    r#""help forum" "ask question" "get answers""#,
    r#""support forum" "question" "answer" "discussion""#,
    r#"site:quora.com OR site:yahoo.com/answers "similar sites""#,
];

/// Fixed template list for a category. Social and other have none.
pub fn templates_for(platform_type: PlatformType) -> &'static [&'static str] {
    match platform_type {
        PlatformType::Web2 => WEB2,
        PlatformType::Directory => DIRECTORY,
        PlatformType::Bookmark => BOOKMARK,
        PlatformType::Profile => PROFILE,
        PlatformType::Forum => FORUM,
        PlatformType::Blog => BLOG,
        PlatformType::Wiki => WIKI,
        PlatformType::Qa => QA,
        PlatformType::Social | PlatformType::Other => &[],
    }
}

/// Ordered, bounded query list: category order, then template order, then
/// keyword order. Per template each keyword yields a quoted variant and an
/// authority-qualified variant, followed by the bare template.
pub fn generate_queries(query: &DiscoveryQuery) -> Vec<GeneratedQuery> {
    let limit = query.query_limit();
    let hint = query.min_da_hint();
    let mut out = Vec::new();

    'categories: for platform_type in query.selected_platform_types() {
        for template in templates_for(platform_type) {
            let mut texts = Vec::with_capacity(query.keywords.len() * 2 + 1);
            for keyword in &query.keywords {
                let keyword = keyword.trim();
                texts.push(format!("{template} \"{keyword}\""));
                texts.push(format!("{template} \"{keyword}\" DA:{hint}+"));
            }
            texts.push(template.to_string());

            for text in texts {
                if out.len() >= limit {
                    break 'categories;
                }
                out.push(GeneratedQuery { platform_type, text });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let q = DiscoveryQuery::new(["seo", "marketing"]).with_limit(60);
        assert_eq!(generate_queries(&q), generate_queries(&q));
    }

    #[test]
    fn directory_seo_example_stays_in_category_and_limit() {
        let q = DiscoveryQuery::new(["seo"])
            .with_platform_types([PlatformType::Directory])
            .with_limit(20);
        let out = generate_queries(&q);
        assert_eq!(out.len(), 20);
        assert!(out.iter().all(|g| g.platform_type == PlatformType::Directory));
        assert!(out.iter().all(|g| DIRECTORY.iter().any(|t| g.text.starts_with(t))));

        assert_eq!(out[0].text, format!("{} \"seo\"", DIRECTORY[0]));
        assert_eq!(out[1].text, format!("{} \"seo\" DA:40+", DIRECTORY[0]));
        assert_eq!(out[2].text, DIRECTORY[0]);
        let with_keyword = out.iter().filter(|g| g.text.contains("\"seo\"")).count();
        assert_eq!(with_keyword, 14);
    }

    #[test]
    fn authority_hint_follows_min_da() {
        let q = DiscoveryQuery::new(["seo"])
            .with_platform_types([PlatformType::Wiki])
            .with_authority_range(Some(55), None);
        let out = generate_queries(&q);
        assert!(out[1].text.ends_with("DA:55+"));
    }

    #[test]
    fn category_order_is_preserved() {
        let q = DiscoveryQuery::new(["x"])
            .with_platform_types([PlatformType::Qa, PlatformType::Web2])
            .with_limit(1000);
        let out = generate_queries(&q);
        assert_eq!(out.len(), (QA.len() + WEB2.len()) * 3);
        assert!(out[..QA.len() * 3]
            .iter()
            .all(|g| g.platform_type == PlatformType::Qa));
        assert!(out[QA.len() * 3..]
            .iter()
            .all(|g| g.platform_type == PlatformType::Web2));
    }

    #[test]
    fn empty_inputs() {
        let no_types = DiscoveryQuery::new(["seo"]).with_platform_types([]);
        assert!(generate_queries(&no_types).is_empty());

        let no_keywords = DiscoveryQuery::new(Vec::<String>::new())
            .with_platform_types([PlatformType::Bookmark]);
        let out = generate_queries(&no_keywords);
        assert_eq!(out.len(), BOOKMARK.len());
        assert!(out.iter().zip(BOOKMARK).all(|(g, t)| g.text == *t));

        let social_only = DiscoveryQuery::new(["seo"]).with_platform_types([PlatformType::Social]);
        assert!(generate_queries(&social_only).is_empty());
    }

    #[test]
    fn default_limit_caps_all_categories() {
        let q = DiscoveryQuery::new(["a", "b", "c"]);
        assert_eq!(generate_queries(&q).len(), 100);
    }
}
