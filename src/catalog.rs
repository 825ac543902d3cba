//! Static region catalog: 32 state codes with display names and the
//! population estimates used as incidence denominators.
//!
//! Also owns the two name-based lookups that depend on the catalog:
//! resolving free-text state names found in monthly tables, and encoding a
//! region as the numeric category the models were trained with.

use serde::Serialize;

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionInfo {
    pub id: i32,
    pub name: &'static str,
    pub population: i64,
}

const fn region(id: i32, name: &'static str, population: i64) -> RegionInfo {
    RegionInfo {
        id,
        name,
        population,
    }
}

/// Population projection (2025) per state code.
pub const REGIONS: [RegionInfo; 32] = [
    region(1, "Aguascalientes", 1_512_400),
    region(2, "Baja California", 3_968_300),
    region(3, "Baja California Sur", 850_700),
    region(4, "Campeche", 1_011_800),
    region(5, "Coahuila de Zaragoza", 3_328_500),
    region(6, "Colima", 775_100),
    region(7, "Chiapas", 6_000_100),
    region(8, "Chihuahua", 3_998_500),
    region(9, "Ciudad de México", 9_386_700),
    region(10, "Durango", 1_913_400),
    region(11, "Guanajuato", 6_555_200),
    region(12, "Guerrero", 3_724_300),
    region(13, "Hidalgo", 3_327_600),
    region(14, "Jalisco", 8_847_600),
    region(15, "México", 18_016_500),
    region(16, "Michoacán de Ocampo", 4_975_800),
    region(17, "Morelos", 2_056_000),
    region(18, "Nayarit", 1_294_800),
    region(19, "Nuevo León", 6_231_200),
    region(20, "Oaxaca", 4_432_900),
    region(21, "Puebla", 6_886_400),
    region(22, "Querétaro", 2_603_300),
    region(23, "Quintana Roo", 1_989_500),
    region(24, "San Luis Potosí", 2_931_400),
    region(25, "Sinaloa", 3_274_600),
    region(26, "Sonora", 3_154_100),
    region(27, "Tabasco", 2_601_900),
    region(28, "Tamaulipas", 3_682_900),
    region(29, "Tlaxcala", 1_421_000),
    region(30, "Veracruz de Ignacio de la Llave", 8_871_300),
    region(31, "Yucatán", 2_561_900),
    region(32, "Zacatecas", 1_698_200),
];

pub const MIN_REGION_ID: i32 = 1;
pub const MAX_REGION_ID: i32 = 32;

/// Look up a region by code.
pub fn lookup(id: i32) -> Option<&'static RegionInfo> {
    // ---
    if !(MIN_REGION_ID..=MAX_REGION_ID).contains(&id) {
        return None;
    }
    REGIONS.get((id - 1) as usize)
}

/// Name variants seen in published monthly tables, lowercased.
const NAME_ALIASES: &[(&str, i32)] = &[
    ("aguascalientes", 1),
    ("baja california", 2),
    ("baja california sur", 3),
    ("campeche", 4),
    ("coahuila", 5),
    ("coahuila de zaragoza", 5),
    ("colima", 6),
    ("chiapas", 7),
    ("chihuahua", 8),
    ("ciudad de mexico", 9),
    ("ciudad de méxico", 9),
    ("distrito federal", 9),
    ("cdmx", 9),
    ("durango", 10),
    ("guanajuato", 11),
    ("guerrero", 12),
    ("hidalgo", 13),
    ("jalisco", 14),
    ("mexico", 15),
    ("méxico", 15),
    ("estado de mexico", 15),
    ("estado de méxico", 15),
    ("michoacan", 16),
    ("michoacán", 16),
    ("michoacan de ocampo", 16),
    ("michoacán de ocampo", 16),
    ("morelos", 17),
    ("nayarit", 18),
    ("nuevo leon", 19),
    ("nuevo león", 19),
    ("oaxaca", 20),
    ("puebla", 21),
    ("queretaro", 22),
    ("querétaro", 22),
    ("quintana roo", 23),
    ("san luis potosi", 24),
    ("san luis potosí", 24),
    ("sinaloa", 25),
    ("sonora", 26),
    ("tabasco", 27),
    ("tamaulipas", 28),
    ("tlaxcala", 29),
    ("veracruz", 30),
    ("veracruz de ignacio de la llave", 30),
    ("yucatan", 31),
    ("yucatán", 31),
    ("zacatecas", 32),
];

/// Resolve a free-text state name to its region code.
///
/// Names are lowercased and stripped of digits (footnote markers such as
/// `Guerrero 1`). An exact alias match wins; otherwise the longest alias that
/// contains, or is contained in, the name is used.
pub fn resolve_name(raw: &str) -> Option<i32> {
    // ---
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .collect::<String>()
        .trim()
        .to_lowercase();
    let name = cleaned.trim_end_matches(['*', '.', ',']).trim();

    if name.is_empty() {
        return None;
    }

    if let Some((_, id)) = NAME_ALIASES.iter().find(|(alias, _)| *alias == name) {
        return Some(*id);
    }

    // Short fragments would match half the table
    if name.chars().count() < 4 {
        return None;
    }

    NAME_ALIASES
        .iter()
        .filter(|(alias, _)| name.contains(alias) || alias.contains(name))
        .max_by_key(|(alias, _)| alias.len())
        .map(|(_, id)| *id)
}

/// Maps a region to the numeric category code a model was trained with.
///
/// The code is the region name's position in the sorted class list, which is
/// how the training side's label encoder assigns codes. Regions whose name is
/// not in the list fall back to their ordinal (`id - 1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEncoder {
    classes: Vec<String>,
}

impl RegionEncoder {
    /// Encoder over the catalog names, sorted.
    pub fn from_catalog() -> Self {
        // ---
        Self::from_classes(REGIONS.iter().map(|r| r.name.to_string()).collect())
    }

    /// Encoder over an explicit class list (sorted and deduplicated here).
    pub fn from_classes(mut classes: Vec<String>) -> Self {
        // ---
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Numeric code for a region; never fails.
    pub fn encode(&self, region_id: i32) -> f64 {
        // ---
        let code = lookup(region_id)
            .and_then(|info| {
                self.classes
                    .binary_search_by(|c| c.as_str().cmp(info.name))
                    .ok()
            })
            .unwrap_or_else(|| {
                tracing::debug!(region_id, "region not in encoder classes, using ordinal");
                (region_id - 1).max(0) as usize
            });
        code as f64
    }
}

impl Default for RegionEncoder {
    fn default() -> Self {
        Self::from_catalog()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn catalog_is_dense_and_ordered() {
        // ---
        for (i, r) in REGIONS.iter().enumerate() {
            assert_eq!(r.id, i as i32 + 1);
            assert!(r.population > 0);
        }
        assert_eq!(lookup(15).map(|r| r.name), Some("México"));
        assert!(lookup(0).is_none());
        assert!(lookup(33).is_none());
    }

    #[test]
    fn resolves_exact_and_variant_names() {
        // ---
        assert_eq!(resolve_name("Baja California Sur"), Some(3));
        assert_eq!(resolve_name("Baja California"), Some(2));
        assert_eq!(resolve_name("  Guerrero 1 "), Some(12));
        assert_eq!(resolve_name("Distrito Federal"), Some(9));
        assert_eq!(resolve_name("Veracruz de Ignacio de la Llave"), Some(30));
        assert_eq!(resolve_name("YUCATAN"), Some(31));
    }

    #[test]
    fn partial_match_prefers_longest_alias() {
        // ---
        // Contains both "baja california" and "baja california sur"
        assert_eq!(resolve_name("Baja California Sur (BCS)"), Some(3));
        assert_eq!(resolve_name("Edo. Michoacán de Ocampo"), Some(16));
    }

    #[test]
    fn rejects_blank_and_unknown_names() {
        // ---
        assert_eq!(resolve_name(""), None);
        assert_eq!(resolve_name("123"), None);
        assert_eq!(resolve_name("Atlantis"), None);
    }

    #[test]
    fn encoder_uses_sorted_position() {
        // ---
        let enc = RegionEncoder::from_catalog();
        // "Aguascalientes" sorts first
        assert_eq!(enc.encode(1), 0.0);
        // "Zacatecas" sorts last
        assert_eq!(enc.encode(32), 31.0);
        // "Baja California" < "Baja California Sur"
        assert!(enc.encode(2) < enc.encode(3));
    }

    #[test]
    fn encoder_falls_back_to_ordinal() {
        // ---
        let enc = RegionEncoder::from_classes(vec!["Jalisco".into(), "Colima".into()]);
        assert_eq!(enc.encode(6), 0.0); // Colima
        assert_eq!(enc.encode(14), 1.0); // Jalisco
        assert_eq!(enc.encode(12), 11.0); // Guerrero missing → id - 1
        assert_eq!(enc.encode(99), 98.0);
    }
}
