//! Caption prompt for the text generator.
//!
//! The prompt carries the record's identity and charges plus the layout the
//! page posts use: a `LAST, FIRST M` name line, the arrest date, one charge
//! per line prefixed with `/`, an optional summed bond and county/name
//! hashtags.

use crate::models::ParsedRecord;

/// Hashtag form of a name or county: every whitespace-separated word
/// concatenated, non-alphanumerics dropped.
pub fn hashtag(words: &[&str]) -> String {
    words
        .iter()
        .flat_map(|w| w.split_whitespace())
        .flat_map(|w| w.chars())
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Build the caption prompt for `record`.
pub fn caption_prompt(record: &ParsedRecord) -> String {
    let county = &record.county_of_booking;
    let county_tag = hashtag(&[county.as_str()]);
    let name_tag = hashtag(&[record.first_name.as_str(), record.last_name.as_str()]);
    let date = record.date_of_booking.format("%m/%d/%Y");

    format!(
        r#"Write an arrest record post for {county}. The county may differ between records, and the county hashtags must follow it.

Record:
First Name: {first}
Last Name: {last}
Date of Booking: {date}
Offense Description:
{offenses}

Rules:
- First line is the name as LAST, FIRST M (middle initial only if known), in capitals.
- Second line is "Arrest Date: " followed by the booking date as MM/DD/YYYY.
- Then a line "Offenses:" and each charge on its own line starting with "/ ".
- Copy the charge text exactly as given, shorthand included. List each charge once.
- If bond amounts are present, add "Bond Amount: " with their sum. Otherwise leave the bond line out entirely, with no placeholder.
- End with the hashtags #{county_tag} #{county_tag}Mugshots #{name_tag} with no spaces inside a tag.

Example:

EDWARDS, JOHN M
Arrest Date: 08/24/2024
Offenses:
/ WANTON ENDANGERMENT - 2ND DEGREE MISDEMEANOR
/ DRUG PARAPHERNALIA - BUY/POSSESS 218A.500(2) MISDEMEANOR

Bond Amount: $25,000.00

#Jefferson #JeffersonMugshots #JohnEdwards"#,
        first = record.first_name,
        last = record.last_name,
        offenses = record.offense_description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::record;
    use chrono::NaiveDate;

    #[test]
    fn test_hashtag_joins_words() {
        assert_eq!(hashtag(&["John", "Van Buren"]), "JohnVanBuren");
        assert_eq!(hashtag(&["St. Clair"]), "StClair");
    }

    #[test]
    fn test_prompt_carries_record_fields() {
        let mut rec = record("John", "Edwards", NaiveDate::from_ymd_opt(2024, 8, 24).unwrap());
        rec.county_of_booking = "Pulaski".into();
        rec.offense_description = "- THEFT BY UNLAWFUL TAKING".into();

        let prompt = caption_prompt(&rec);
        assert!(prompt.starts_with("Write an arrest record post for Pulaski."));
        assert!(prompt.contains("First Name: John\n"));
        assert!(prompt.contains("Date of Booking: 08/24/2024\n"));
        assert!(prompt.contains("- THEFT BY UNLAWFUL TAKING"));
        assert!(prompt.contains("#Pulaski #PulaskiMugshots #JohnEdwards"));
    }
}
