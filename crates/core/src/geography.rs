//! Geographic eligibility.
//!
//! An advisor is eligible for a solicitud when any of three rules match the
//! origin municipality: same city, same metropolitan area, or same logistics
//! hub. The strongest matching rule is kept so scoring can reward proximity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::advisor::{Advisor, AdvisorGeography, AdvisorId};

/// Metro-area tag used by the municipality catalog for "not in a metro area".
pub const NO_METRO_AREA: &str = "NONE";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Municipality {
    pub code: String,
    pub name: String,
    pub department: String,
    pub metro_area: Option<String>,
    pub hub: Option<String>,
}

impl Municipality {
    /// Metro-area tag, with the catalog's sentinel treated as absent.
    pub fn metro_area_tag(&self) -> Option<&str> {
        meaningful_tag(self.metro_area.as_deref())
    }

    pub fn hub_tag(&self) -> Option<&str> {
        meaningful_tag(self.hub.as_deref())
    }
}

/// Ordered weakest to strongest so `max` picks the highest-precedence rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityMatch {
    SameHub,
    SameMetroArea,
    SameCity,
}

impl ProximityMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameHub => "same_hub",
            Self::SameMetroArea => "same_metro_area",
            Self::SameCity => "same_city",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibleAdvisor {
    pub advisor: Advisor,
    pub proximity: ProximityMatch,
}

/// Uppercases, strips diacritics and punctuation, and collapses whitespace.
///
/// `"  Bogotá, D.C. "` becomes `"BOGOTA D C"`.
pub fn normalize_place(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let base = fold_diacritic(ch);
        if base.is_alphanumeric() {
            folded.extend(base.to_uppercase());
        } else {
            folded.push(' ');
        }
    }

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_diacritic(ch: char) -> char {
    match ch {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ç' => 'c',
        'Ç' => 'C',
        other => other,
    }
}

fn meaningful_tag(tag: Option<&str>) -> Option<&str> {
    tag.map(str::trim)
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case(NO_METRO_AREA))
}

/// Which rule, if any, makes `advisor` eligible for a request from `origin`.
///
/// `home` is the catalog entry for the advisor's own city. When present, its
/// code and tags decide every rule; the tags stored on the advisor only apply
/// to cities the catalog does not know.
pub fn proximity_of(
    origin: &Municipality,
    advisor: &Advisor,
    home: Option<&Municipality>,
) -> Option<ProximityMatch> {
    match home {
        Some(home) => catalog_proximity(origin, home),
        None => declared_proximity(origin, &advisor.geography),
    }
}

fn catalog_proximity(origin: &Municipality, home: &Municipality) -> Option<ProximityMatch> {
    if home.code == origin.code {
        return Some(ProximityMatch::SameCity);
    }
    if tags_match(origin.metro_area_tag(), home.metro_area_tag()) {
        return Some(ProximityMatch::SameMetroArea);
    }
    if tags_match(origin.hub_tag(), home.hub_tag()) {
        return Some(ProximityMatch::SameHub);
    }
    None
}

fn declared_proximity(
    origin: &Municipality,
    geography: &AdvisorGeography,
) -> Option<ProximityMatch> {
    // A city name only identifies the origin when the departments agree or the
    // advisor never declared one.
    let same_department = geography
        .department
        .as_deref()
        .map(normalize_place)
        .filter(|department| !department.is_empty())
        .map_or(true, |department| department == normalize_place(&origin.department));

    if same_department && normalize_place(&geography.city) == normalize_place(&origin.name) {
        return Some(ProximityMatch::SameCity);
    }
    if tags_match(origin.metro_area_tag(), meaningful_tag(geography.metro_area.as_deref())) {
        return Some(ProximityMatch::SameMetroArea);
    }
    if tags_match(origin.hub_tag(), meaningful_tag(geography.hub.as_deref())) {
        return Some(ProximityMatch::SameHub);
    }
    None
}

fn tags_match(origin: Option<&str>, advisor: Option<&str>) -> bool {
    match (origin, advisor) {
        (Some(origin), Some(advisor)) => normalize_place(origin) == normalize_place(advisor),
        _ => false,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GeographicEligibilityResolver;

impl GeographicEligibilityResolver {
    /// Union of the three rules, deduplicated by advisor id and sorted by id.
    ///
    /// `origin` is `None` when the origin city could not be resolved; the pool
    /// is then empty and the caller reports `GeographyUnresolved`. `home_of`
    /// returns the catalog entry for an advisor's city, if the catalog has one.
    pub fn resolve<'h>(
        &self,
        origin: Option<&Municipality>,
        advisors: &[Advisor],
        home_of: impl Fn(&Advisor) -> Option<&'h Municipality>,
    ) -> Vec<EligibleAdvisor> {
        let Some(origin) = origin else {
            return Vec::new();
        };

        let mut pool: BTreeMap<AdvisorId, EligibleAdvisor> = BTreeMap::new();
        for advisor in advisors.iter().filter(|advisor| advisor.active) {
            let Some(proximity) = proximity_of(origin, advisor, home_of(advisor)) else {
                continue;
            };
            pool.entry(advisor.id.clone())
                .and_modify(|existing| existing.proximity = existing.proximity.max(proximity))
                .or_insert_with(|| EligibleAdvisor { advisor: advisor.clone(), proximity });
        }

        pool.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_place, proximity_of, GeographicEligibilityResolver, Municipality,
        ProximityMatch,
    };
    use crate::domain::advisor::{Advisor, AdvisorGeography, AdvisorId};

    fn municipality(name: &str, metro: Option<&str>, hub: Option<&str>) -> Municipality {
        Municipality {
            code: format!("M-{name}"),
            name: name.to_string(),
            department: "ANTIOQUIA".to_string(),
            metro_area: metro.map(str::to_string),
            hub: hub.map(str::to_string),
        }
    }

    fn barbosa(code: &str, department: &str, metro: Option<&str>, hub: &str) -> Municipality {
        Municipality {
            code: code.to_string(),
            name: "Barbosa".to_string(),
            department: department.to_string(),
            metro_area: metro.map(str::to_string),
            hub: Some(hub.to_string()),
        }
    }

    fn advisor(id: &str, city: &str, metro: Option<&str>, hub: Option<&str>) -> Advisor {
        Advisor {
            id: AdvisorId(id.to_string()),
            name: format!("Advisor {id}"),
            geography: AdvisorGeography {
                city: city.to_string(),
                department: None,
                metro_area: metro.map(str::to_string),
                hub: hub.map(str::to_string),
            },
            active: true,
        }
    }

    #[test]
    fn normalization_strips_accents_punctuation_and_spacing() {
        assert_eq!(normalize_place("  Bogotá, D.C. "), "BOGOTA D C");
        assert_eq!(normalize_place("medellín"), "MEDELLIN");
        assert_eq!(normalize_place("San   Andrés\tIsla"), "SAN ANDRES ISLA");
        assert_eq!(normalize_place("Cúcuta-Norte"), "CUCUTA NORTE");
        assert_eq!(normalize_place("Peñol"), "PENOL");
    }

    #[test]
    fn highest_precedence_rule_wins() {
        let origin = municipality("MEDELLIN", Some("VALLE DE ABURRA"), Some("HUB-ANT"));

        let same_city = advisor("A1", "Medellín", Some("VALLE DE ABURRA"), Some("HUB-ANT"));
        assert_eq!(proximity_of(&origin, &same_city, None), Some(ProximityMatch::SameCity));

        let metro = advisor("A2", "ENVIGADO", Some("VALLE DE ABURRA"), Some("HUB-ANT"));
        assert_eq!(proximity_of(&origin, &metro, None), Some(ProximityMatch::SameMetroArea));

        let hub = advisor("A3", "RIONEGRO", None, Some("HUB-ANT"));
        assert_eq!(proximity_of(&origin, &hub, None), Some(ProximityMatch::SameHub));

        let far = advisor("A4", "PASTO", None, Some("HUB-NAR"));
        assert_eq!(proximity_of(&origin, &far, None), None);
    }

    #[test]
    fn none_sentinel_disables_the_metro_rule() {
        let origin = municipality("RIONEGRO", Some("NONE"), Some("HUB-ANT"));
        let advisor = advisor("A1", "MARINILLA", Some("NONE"), None);

        assert_eq!(proximity_of(&origin, &advisor, None), None);
    }

    #[test]
    fn same_name_in_another_department_is_not_the_same_city() {
        let origin = barbosa("68077", "Santander", Some("NONE"), "HUB-SAN");
        let antioquia = barbosa("05079", "Antioquia", Some("VALLE DE ABURRA"), "HUB-ANT");
        let advisor = advisor("A1", "Barbosa", None, None);

        assert_eq!(proximity_of(&origin, &advisor, Some(&antioquia)), None);
        assert_eq!(proximity_of(&origin, &advisor, Some(&origin)), Some(ProximityMatch::SameCity));

        let mut declared = advisor.clone();
        declared.geography.department = Some("Antioquia".to_string());
        assert_eq!(proximity_of(&origin, &declared, None), None);
        declared.geography.department = Some("santander".to_string());
        assert_eq!(proximity_of(&origin, &declared, None), Some(ProximityMatch::SameCity));
    }

    #[test]
    fn catalog_tags_take_precedence_over_advisor_tags() {
        let origin = municipality("MEDELLIN", Some("VALLE DE ABURRA"), Some("HUB-ANT"));

        let unlabeled = advisor("A1", "ENVIGADO", None, None);
        let envigado = municipality("ENVIGADO", Some("Valle de Aburrá"), Some("HUB-ANT"));
        assert_eq!(
            proximity_of(&origin, &unlabeled, Some(&envigado)),
            Some(ProximityMatch::SameMetroArea)
        );

        let stale = advisor("A2", "MARINILLA", Some("VALLE DE ABURRA"), None);
        let marinilla = municipality("MARINILLA", Some("NONE"), Some("HUB-ORIENTE"));
        assert_eq!(proximity_of(&origin, &stale, Some(&marinilla)), None);
        assert_eq!(proximity_of(&origin, &stale, None), Some(ProximityMatch::SameMetroArea));
    }

    #[test]
    fn resolver_uses_each_advisor_home_municipality() {
        let origin = municipality("MEDELLIN", Some("VALLE DE ABURRA"), Some("HUB-ANT"));
        let itagui = municipality("ITAGUI", Some("VALLE DE ABURRA"), Some("HUB-ANT"));
        let advisors = vec![
            advisor("A1", "ITAGUI", None, None),
            advisor("A2", "PASTO", None, Some("HUB-NAR")),
        ];

        let pool = GeographicEligibilityResolver.resolve(Some(&origin), &advisors, |advisor| {
            (advisor.id.0 == "A1").then_some(&itagui)
        });
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].advisor.id.0, "A1");
        assert_eq!(pool[0].proximity, ProximityMatch::SameMetroArea);
    }

    #[test]
    fn resolver_dedupes_and_skips_inactive() {
        let origin = municipality("MEDELLIN", Some("VALLE DE ABURRA"), Some("HUB-ANT"));
        let mut inactive = advisor("A9", "MEDELLIN", None, None);
        inactive.active = false;

        let advisors = vec![
            advisor("A2", "ENVIGADO", Some("VALLE DE ABURRA"), None),
            advisor("A1", "MEDELLIN", None, None),
            advisor("A1", "MEDELLIN", None, None),
            inactive,
        ];

        let pool = GeographicEligibilityResolver.resolve(Some(&origin), &advisors, |_| None);
        let ids: Vec<&str> = pool.iter().map(|entry| entry.advisor.id.0.as_str()).collect();
        assert_eq!(ids, vec!["A1", "A2"]);
        assert_eq!(pool[0].proximity, ProximityMatch::SameCity);
        assert_eq!(pool[1].proximity, ProximityMatch::SameMetroArea);
    }

    #[test]
    fn unresolved_origin_yields_empty_pool() {
        let advisors = vec![advisor("A1", "MEDELLIN", None, None)];
        assert!(GeographicEligibilityResolver.resolve(None, &advisors, |_| None).is_empty());
    }
}
