use std::collections::{BTreeSet, HashMap};

use crate::config::GuidanceOverride;
use crate::error::{OutbreakError, Result};
use crate::models::{Audience, Classification, GuidanceMessage, TrendSnapshot};

/// Advisory text for every (classification, audience) pair. Built complete
/// or not at all.
#[derive(Debug, Clone)]
pub struct GuidanceTable {
    entries: HashMap<(Classification, Audience), String>,
}

impl GuidanceTable {
    pub fn standard() -> Self {
        let entries = Classification::ALL
            .iter()
            .flat_map(|c| Audience::ALL.iter().map(move |a| ((*c, *a), standard_text(*c, *a).to_string())))
            .collect();
        Self { entries }
    }

    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Classification, Audience, String)>,
    {
        let table = Self {
            entries: entries
                .into_iter()
                .map(|(c, a, text)| ((c, a), text))
                .collect(),
        };
        table.validate()?;
        Ok(table)
    }

    pub fn with_overrides(overrides: &[GuidanceOverride]) -> Result<Self> {
        let mut entries = Self::standard().entries;
        for item in overrides {
            if item.text.trim().is_empty() {
                return Err(OutbreakError::config(format!(
                    "empty guidance override for {} / {}",
                    item.classification,
                    item.audience.as_str()
                )));
            }
            entries.insert((item.classification, item.audience), item.text.clone());
        }
        Self::from_entries(entries.into_iter().map(|((c, a), text)| (c, a, text)))
    }

    fn validate(&self) -> Result<()> {
        for c in Classification::ALL {
            for a in Audience::ALL {
                if !self.entries.contains_key(&(c, a)) {
                    return Err(OutbreakError::config(format!(
                        "guidance table missing {} / {}",
                        c,
                        a.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn lookup(&self, classification: Classification, audience: Audience) -> Result<GuidanceMessage> {
        let text = self.entries.get(&(classification, audience)).ok_or_else(|| {
            OutbreakError::config(format!(
                "guidance table missing {} / {}",
                classification,
                audience.as_str()
            ))
        })?;
        Ok(GuidanceMessage {
            audience,
            risk_classification: classification,
            advisory_text: text.clone(),
        })
    }

    pub fn synthesize(
        &self,
        snapshot: &TrendSnapshot,
        audiences: &BTreeSet<Audience>,
    ) -> Result<Vec<GuidanceMessage>> {
        audiences
            .iter()
            .map(|audience| self.lookup(snapshot.classification, *audience))
            .collect()
    }
}

/// Audiences named in a query; GENERAL when none is.
pub fn detect_audiences(text: &str) -> BTreeSet<Audience> {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let any = |list: &[&str]| words.iter().any(|w| list.contains(w));

    let mut audiences = BTreeSet::new();
    if any(&["school", "schools", "student", "students", "classroom", "campus", "teacher", "teachers"]) {
        audiences.insert(Audience::School);
    }
    if any(&["travel", "trip", "flight", "flights", "airport", "vacation", "visit"]) {
        audiences.insert(Audience::Travel);
    }
    if any(&["work", "workplace", "office", "employees", "employer", "business", "staff"]) {
        audiences.insert(Audience::Workplace);
    }
    if audiences.is_empty() {
        audiences.insert(Audience::General);
    }
    audiences
}

fn standard_text(classification: Classification, audience: Audience) -> &'static str {
    use Audience::*;
    use Classification::*;

    match (classification, audience) {
        (RapidAcceleration, General) => "Cases are rising fast. Wear a well-fitting N95 or KN95 mask in all indoor public settings, limit gatherings, and get tested if you have symptoms.",
        (RapidAcceleration, School) => "Consider temporary remote learning. If classes stay in person, require masks, improve ventilation, and run daily health screenings.",
        (RapidAcceleration, Travel) => "Avoid non-essential travel to or from the area. If travel is necessary, mask on public transport and test before and after the trip.",
        (RapidAcceleration, Workplace) => "Move to remote work where possible. Essential on-site staff should mask, work in ventilated spaces, and screen daily for symptoms.",

        (ModerateGrowth, General) => "Cases are increasing. Mask in crowded indoor spaces and healthcare settings, and stay home when sick.",
        (ModerateGrowth, School) => "Strengthen safety measures: masks in common areas, better ventilation, and symptom screening before school.",
        (ModerateGrowth, Travel) => "Consider postponing non-essential travel. Testing before departure and masking in transit are recommended.",
        (ModerateGrowth, Workplace) => "Offer hybrid work, increase cleaning of shared spaces, and encourage masking in common areas.",

        (Stable, General) => "Activity is steady. Keep standard precautions: wash hands, stay home when sick, and mask if you are at higher risk.",
        (Stable, School) => "Keep standard health protocols in place. Students and staff with symptoms should stay home.",
        (Stable, Travel) => "No travel restrictions. Check conditions at your destination before leaving and follow standard precautions.",
        (Stable, Workplace) => "Maintain standard workplace health practices and flexible sick leave.",

        (Declining, General) => "Cases are falling. Standard precautions remain sensible, especially for people at higher risk.",
        (Declining, School) => "Routine protocols are sufficient. Continue monitoring absences for unusual clusters.",
        (Declining, Travel) => "Travel is reasonable with standard precautions. Monitor for changes before departure.",
        (Declining, Workplace) => "Standard workplace practices are sufficient. Keep sick-leave policies that let ill staff stay home.",

        (RapidDecline, General) => "Cases are dropping quickly. Masks are optional for the general public; follow facility-specific requirements.",
        (RapidDecline, School) => "Normal operations with routine monitoring. Keep encouraging sick students to stay home.",
        (RapidDecline, Travel) => "No travel restrictions beyond standard health precautions.",
        (RapidDecline, Workplace) => "Normal operations. Encourage vaccination and good hygiene.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snapshot(classification: Classification) -> TrendSnapshot {
        TrendSnapshot {
            region_key: "Florida".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            seven_day_avg: 40.0,
            prior_seven_day_avg: 30.0,
            growth_rate: 0.33,
            classification,
            outbreak_probability: 85,
            estimated: false,
        }
    }

    #[test]
    fn every_combination_has_guidance() {
        let table = GuidanceTable::standard();
        for c in Classification::ALL {
            for a in Audience::ALL {
                let message = table.lookup(c, a).unwrap();
                assert_eq!(message.audience, a);
                assert_eq!(message.risk_classification, c);
                assert!(!message.advisory_text.is_empty());
            }
        }
    }

    #[test]
    fn incomplete_table_is_a_config_error() {
        let entries = vec![(
            Classification::Stable,
            Audience::General,
            "Stay well.".to_string(),
        )];
        assert!(matches!(
            GuidanceTable::from_entries(entries),
            Err(OutbreakError::Config(_))
        ));
    }

    #[test]
    fn overrides_replace_single_entries() {
        let overrides = vec![GuidanceOverride {
            audience: Audience::Travel,
            classification: Classification::Stable,
            text: "Check the county dashboard first.".to_string(),
        }];
        let table = GuidanceTable::with_overrides(&overrides).unwrap();
        assert_eq!(
            table.lookup(Classification::Stable, Audience::Travel).unwrap().advisory_text,
            "Check the county dashboard first."
        );
        assert_ne!(
            table.lookup(Classification::Stable, Audience::School).unwrap().advisory_text,
            "Check the county dashboard first."
        );
    }

    #[test]
    fn synthesizes_one_message_per_audience() {
        let table = GuidanceTable::standard();
        let audiences = BTreeSet::from([Audience::School, Audience::Travel]);
        let messages = table
            .synthesize(&snapshot(Classification::RapidAcceleration), &audiences)
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.risk_classification == Classification::RapidAcceleration));
    }

    #[test]
    fn audience_detection() {
        assert_eq!(
            detect_audiences("Is it safe to send students to school?"),
            BTreeSet::from([Audience::School])
        );
        assert_eq!(
            detect_audiences("Should my office staff travel next week?"),
            BTreeSet::from([Audience::Travel, Audience::Workplace])
        );
        assert_eq!(detect_audiences("What should I do?"), BTreeSet::from([Audience::General]));
    }
}
