use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Name of the category every tree hangs from
pub const ROOT_CATEGORY: &str = "root";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Author {
    pub uid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Category {
    pub uid: Uuid,
    pub name: String,
    pub parent_uid: Option<Uuid>,
    /// Column of this category in the collaborative-filtering matrix
    pub cf_index: i32,
}

/// A book in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub uid: Uuid,
    pub sku: String,
    pub name: String,
    pub price: f64,
    pub publisher: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub authors: Vec<Author>,
    pub categories: Vec<Category>,
    /// Mean of all ratings given to the book
    pub rating: f64,
    pub rating_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn has_author(&self, author_uid: &Uuid) -> bool {
        self.authors.iter().any(|a| &a.uid == author_uid)
    }

    pub fn has_category(&self, category_uid: &Uuid) -> bool {
        self.categories.iter().any(|c| &c.uid == category_uid)
    }
}

/// Payload of `POST /product/item_create`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBook {
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 64, message = "SKU is required"))]
    pub sku: String,
    #[validate(range(min = 0.0, message = "Price must not be negative"))]
    pub price: f64,
    #[validate(length(min = 1, max = 255, message = "Publisher is required"))]
    pub publisher: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Author names, created on first use
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub categories: Vec<Uuid>,
}

/// Query-string filters of the popular listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookFilter {
    pub search: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub author: Option<Uuid>,
    pub category: Option<Uuid>,
    pub publisher: Option<String>,
    /// Minimum average rating
    pub rating: Option<f64>,
}

impl BookFilter {
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, book: &Book) -> bool {
        if let Some(term) = self.search_term() {
            if !book.name.to_lowercase().contains(&term) {
                return false;
            }
        }
        if self.price_min.is_some_and(|min| book.price < min) {
            return false;
        }
        if self.price_max.is_some_and(|max| book.price > max) {
            return false;
        }
        if self.author.is_some_and(|uid| !book.has_author(&uid)) {
            return false;
        }
        if self.category.is_some_and(|uid| !book.has_category(&uid)) {
            return false;
        }
        if let Some(publisher) = self.publisher.as_deref() {
            if !book.publisher.eq_ignore_ascii_case(publisher.trim()) {
                return false;
            }
        }
        if self.rating.is_some_and(|min| book.rating < min) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelatedQuery {
    pub uid: Option<Uuid>,
    pub search: Option<String>,
}

/// One category with its nested children, keyed by child name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryNode {
    pub uid: Uuid,
    pub children: Vec<BTreeMap<String, CategoryNode>>,
}

/// The whole category hierarchy under the root category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTree {
    pub root: CategoryNode,
}

impl CategoryTree {
    /// Nests `categories` under the category named [`ROOT_CATEGORY`].
    ///
    /// Children are ordered by name. Categories unreachable from the root are
    /// left out.
    pub fn build(categories: &[Category]) -> AppResult<Self> {
        let root = categories
            .iter()
            .find(|c| c.name == ROOT_CATEGORY && c.parent_uid.is_none())
            .ok_or_else(|| AppError::NotFound("Root category is missing".to_string()))?;

        let mut children: HashMap<Uuid, Vec<&Category>> = HashMap::new();
        for category in categories {
            if let Some(parent) = category.parent_uid {
                children.entry(parent).or_default().push(category);
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let mut visited = HashSet::new();
        Ok(Self {
            root: Self::node(root, &children, &mut visited),
        })
    }

    fn node(
        category: &Category,
        children: &HashMap<Uuid, Vec<&Category>>,
        visited: &mut HashSet<Uuid>,
    ) -> CategoryNode {
        visited.insert(category.uid);
        let mut nodes = Vec::new();
        for child in children.get(&category.uid).into_iter().flatten() {
            // parent cycles in stored data
            if visited.contains(&child.uid) {
                continue;
            }
            let mut entry = BTreeMap::new();
            entry.insert(child.name.clone(), Self::node(child, children, visited));
            nodes.push(entry);
        }
        CategoryNode {
            uid: category.uid,
            children: nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, parent: Option<Uuid>) -> Category {
        Category {
            uid: Uuid::new_v4(),
            name: name.to_string(),
            parent_uid: parent,
            cf_index: 0,
        }
    }

    fn book(name: &str, price: f64) -> Book {
        Book {
            uid: Uuid::new_v4(),
            sku: format!("SKU-{}", name),
            name: name.to_string(),
            price,
            publisher: "Penguin".to_string(),
            description: None,
            image_url: None,
            authors: vec![],
            categories: vec![],
            rating: 4.0,
            rating_count: 3,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_category_tree_nests_children() {
        let root = category(ROOT_CATEGORY, None);
        let fiction = category("Fiction", Some(root.uid));
        let science = category("Science", Some(root.uid));
        let fantasy = category("Fantasy", Some(fiction.uid));

        let tree =
            CategoryTree::build(&[fantasy.clone(), science.clone(), root.clone(), fiction.clone()])
                .unwrap();

        assert_eq!(tree.root.uid, root.uid);
        assert_eq!(tree.root.children.len(), 2);
        let fiction_node = &tree.root.children[0]["Fiction"];
        assert_eq!(fiction_node.uid, fiction.uid);
        assert_eq!(fiction_node.children[0]["Fantasy"].uid, fantasy.uid);
        assert!(tree.root.children[1]["Science"].children.is_empty());
    }

    #[test]
    fn test_category_tree_json_shape() {
        let root = category(ROOT_CATEGORY, None);
        let fiction = category("Fiction", Some(root.uid));
        let tree = CategoryTree::build(&[root.clone(), fiction.clone()]).unwrap();

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["root"]["uid"], root.uid.to_string());
        assert_eq!(
            json["root"]["children"][0]["Fiction"]["uid"],
            fiction.uid.to_string()
        );
    }

    #[test]
    fn test_category_tree_without_root() {
        let err = CategoryTree::build(&[category("Fiction", None)]).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_category_tree_survives_cycles() {
        let root = category(ROOT_CATEGORY, None);
        let a = category("A", Some(root.uid));
        let b = category("B", Some(a.uid));
        let mut c = category("C", Some(b.uid));
        c.uid = a.uid;

        let tree = CategoryTree::build(&[root, a, b, c]).unwrap();
        assert_eq!(tree.root.children.len(), 1);
    }

    #[test]
    fn test_filter_by_search_and_price() {
        let filter = BookFilter {
            search: Some("  dune ".to_string()),
            price_max: Some(20.0),
            ..BookFilter::default()
        };
        assert!(filter.matches(&book("Dune Messiah", 12.5)));
        assert!(!filter.matches(&book("Dune", 25.0)));
        assert!(!filter.matches(&book("Emma", 5.0)));
    }

    #[test]
    fn test_filter_by_author_category_and_rating() {
        let author = Author {
            uid: Uuid::new_v4(),
            name: "Frank Herbert".to_string(),
        };
        let scifi = category("Sci-Fi", None);
        let mut dune = book("Dune", 10.0);
        dune.authors.push(author.clone());
        dune.categories.push(scifi.clone());

        let filter = BookFilter {
            author: Some(author.uid),
            category: Some(scifi.uid),
            rating: Some(3.5),
            publisher: Some("penguin".to_string()),
            ..BookFilter::default()
        };
        assert!(filter.matches(&dune));

        let strict = BookFilter {
            rating: Some(4.5),
            ..BookFilter::default()
        };
        assert!(!strict.matches(&dune));
        assert!(!filter.matches(&book("Emma", 5.0)));
    }
}
