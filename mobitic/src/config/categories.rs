use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Reserved catch-all for codes no category declares
pub const OTHER_CATEGORY: &str = "Autres";
const OTHER_COLOR: &str = "gray";
const OTHER_ICON: &str = "info-sign";

/// One thematic group of BPE facility-type codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Marker color (Leaflet awesome-markers palette, also a CSS color name)
    pub color: String,
    /// Bootstrap glyphicon name
    pub icon: String,
    pub codes: Vec<String>,
}

impl Category {
    pub fn new(name: &str, color: &str, icon: &str, codes: &[&str]) -> Self {
        Category {
            name: name.to_string(),
            color: color.to_string(),
            icon: icon.to_string(),
            codes: codes.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Facility-type code to category lookup.
///
/// Built once at startup and shared by reference. Code sets must be disjoint:
/// when a code is declared twice the first-declared category wins, and the
/// duplicate is reported by `duplicate_codes`, never at lookup time.
#[derive(Debug, Clone)]
pub struct CategoryTaxonomy {
    categories: Vec<Category>,
    index: HashMap<String, usize>,
}

impl CategoryTaxonomy {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut index = HashMap::new();
        for (position, category) in categories.iter().enumerate() {
            for code in &category.codes {
                index.entry(code.clone()).or_insert(position);
            }
        }

        let taxonomy = CategoryTaxonomy { categories, index };
        for (code, categories) in taxonomy.duplicate_codes() {
            log::warn!(
                "Facility code {} is declared in several categories ({}); {} wins",
                code,
                categories.join(", "),
                categories[0]
            );
        }
        taxonomy
    }

    /// Build from configured categories, falling back to the built-in table
    pub fn from_config(categories: &[Category]) -> Self {
        if categories.is_empty() {
            Self::default()
        } else {
            Self::new(categories.to_vec())
        }
    }

    /// Category name for a facility-type code; total, unknown codes map to `Autres`
    pub fn classify(&self, code: &str) -> &str {
        self.index
            .get(code.trim())
            .map(|&position| self.categories[position].name.as_str())
            .unwrap_or(OTHER_CATEGORY)
    }

    /// Declared categories, in declaration order (without `Autres`)
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Category names in declaration order followed by `Autres`, unless a
    /// declared category already uses that name
    pub fn category_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.categories.iter().map(|c| c.name.as_str()).collect();
        if !names.contains(&OTHER_CATEGORY) {
            names.push(OTHER_CATEGORY);
        }
        names
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn color_of(&self, name: &str) -> &str {
        self.get(name).map(|c| c.color.as_str()).unwrap_or(OTHER_COLOR)
    }

    pub fn icon_of(&self, name: &str) -> &str {
        self.get(name).map(|c| c.icon.as_str()).unwrap_or(OTHER_ICON)
    }

    /// Codes declared by more than one category, with the declaring categories
    pub fn duplicate_codes(&self) -> Vec<(String, Vec<String>)> {
        let mut seen: Vec<(String, Vec<String>)> = Vec::new();
        for category in &self.categories {
            for code in &category.codes {
                match seen.iter_mut().find(|(c, _)| c == code) {
                    Some((_, owners)) => {
                        if !owners.contains(&category.name) {
                            owners.push(category.name.clone());
                        }
                    }
                    None => seen.push((code.clone(), vec![category.name.clone()])),
                }
            }
        }
        seen.retain(|(_, owners)| owners.len() > 1);
        seen
    }
}

impl Default for CategoryTaxonomy {
    /// BPE categories used for the Lyon map
    fn default() -> Self {
        CategoryTaxonomy::new(vec![
            Category::new(
                "Santé",
                "red",
                "plus-sign",
                &[
                    // Professionnels de santé (D2)
                    "D265", "D266", "D267", "D268", "D269", "D270", "D271", "D272", "D273",
                    "D274", "D275", "D276", "D277", "D278", "D279", "D280", "D281", "D245",
                    "D247", "D248", "D249", "D250", "D251", "D252", "D253", "D254", "D255",
                    "D256", "D257", "D258", "D259", "D260", "D261", "D262",
                    // Établissements de santé (D1)
                    "D101", "D102", "D103", "D104", "D105", "D106", "D107", "D108", "D109",
                    "D110", "D111", "D112", "D113", "D114", "D115",
                    // Autres services sanitaires (D3)
                    "D302", "D303", "D304", "D305", "D307",
                ],
            ),
            Category::new(
                "Éducation",
                "blue",
                "book",
                &[
                    "C107", "C108", "C109", "C201", "C301", "C302", "C303", "C304", "C305",
                    "C401", "C403", "C409", "C410", "C501", "C502", "C503", "C504", "C505",
                    "C509", "C602", "C603", "C604", "C610", "C701", "C702",
                ],
            ),
            Category::new(
                "Commerces",
                "green",
                "shopping-cart",
                &[
                    "B103", "B104", "B105", "B201", "B202", "B204", "B205", "B206", "B207",
                    "B208", "B209", "B210", "B302", "B303", "B304", "B306", "B307", "B308",
                    "B309", "B310", "B311", "B312", "B313", "B315", "B316", "B317", "B318",
                    "B319", "B320", "B321", "B322", "B323", "B324", "B325", "B326",
                ],
            ),
            Category::new(
                "Sports & Loisirs",
                "orange",
                "heart",
                &[
                    "F101", "F102", "F103", "F105", "F106", "F107", "F108", "F109", "F110",
                    "F111", "F113", "F114", "F116", "F118", "F119", "F120", "F121", "F122",
                    "F123", "F124", "F125", "F126", "F127", "F128", "F129", "F130", "F201",
                    "F202", "F203", "F204", "F303", "F305", "F307", "F312", "F313", "F314",
                    "F315",
                ],
            ),
            Category::new(
                "Services publics",
                "purple",
                "home",
                &[
                    "A101", "A104", "A105", "A108", "A109", "A120", "A121", "A122", "A124",
                    "A125", "A126", "A128", "A129", "A130", "A131", "A132", "A133", "A134",
                    "A135", "A136", "A137", "A138", "A139", "A203", "A205", "A206", "A207",
                    "A208",
                ],
            ),
            Category::new(
                "Artisanat & Services",
                "darkblue",
                "wrench",
                &[
                    "A301", "A302", "A303", "A304", "A401", "A402", "A403", "A404", "A405",
                    "A406", "A501", "A502", "A503", "A504", "A505", "A506", "A507",
                ],
            ),
            Category::new(
                "Transports",
                "gray",
                "road",
                &["E101", "E102", "E107", "E108", "E109"],
            ),
            Category::new(
                "Action sociale",
                "pink",
                "heart",
                &[
                    "D401", "D402", "D403", "D502", "D503", "D504", "D505", "D506", "D507",
                    "D601", "D602", "D603", "D604", "D605", "D606", "D607", "D701", "D702",
                    "D703", "D704", "D705", "D710", "D711",
                ],
            ),
            Category::new(
                "Tourisme",
                "lightblue",
                "plane",
                &["G101", "G102", "G103", "G104", "G105"],
            ),
        ])
    }
}
