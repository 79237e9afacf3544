//! Static performance review of generated code
//!
//! Advisory only: suggestions are recorded in the trace and the answer but
//! never block an attempt.

/// Suggestions for a piece of pandas code
#[must_use]
pub fn review(code: &str) -> Vec<String> {
    let mut notes = Vec::new();

    if code.contains(".iterrows(") || code.contains(".itertuples(") {
        notes.push("Replace row iteration with vectorized column operations.".to_string());
    }

    if code.contains(".apply(") && code.contains("lambda") {
        notes.push("Use vectorized expressions instead of apply with a lambda where possible.".to_string());
    }

    let brackets = code.matches('[').count();
    let indexers = code.matches(".loc[").count() + code.matches(".iloc[").count();
    if code.contains("][") && brackets > indexers {
        notes.push("Use .loc for combined row/column selection instead of chained indexing.".to_string());
    }

    if code.matches("read_csv(").count() > 1 {
        notes.push("Load the dataset once and reuse the frame.".to_string());
    }

    notes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_code_has_no_notes() {
        let code = "df = pd.read_csv('/data/s.csv')\nprint(df.groupby('region')['revenue'].sum())";
        assert!(review(code).is_empty());
    }

    #[test]
    fn flags_row_iteration_and_lambda_apply() {
        let code = "for _, row in df.iterrows():\n    pass\ndf['x'] = df['a'].apply(lambda v: v * 2)";
        let notes = review(code);
        assert_eq!(notes.len(), 2);
        assert!(notes[0].contains("row iteration"));
        assert!(notes[1].contains("lambda"));
    }

    #[test]
    fn flags_chained_indexing() {
        let notes = review("df[df['region'] == 'north']['revenue'] = 0");
        assert!(notes.iter().any(|n| n.contains("chained indexing")));
    }

    #[test]
    fn loc_selection_is_not_chained() {
        let notes = review("df.loc[df.region == 'north', 'revenue'] = 0");
        assert!(notes.is_empty());
    }
}
