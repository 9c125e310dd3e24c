//! Majority voting over repeated agent calls.

/// Something that casts a vote and may explain it.
pub trait Ballot: Sized {
    /// The hashable answer being counted.
    fn vote(&self) -> String;
    /// Why this answer was given, if the ballot carries a reason.
    fn reason(&self) -> Option<String>;
    /// Replace the reason (used to record the outcome of the vote).
    fn with_reason(self, reason: String) -> Self;
}

/// The aggregated result of a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome<B> {
    /// First winning ballot, with its reason replaced by a vote summary.
    pub winner: B,
    /// Number of ballots cast for the winning answer.
    pub votes_for_winner: usize,
    /// Every successful ballot, in call order.
    pub ballots: Vec<B>,
    /// Number of calls that failed and cast no ballot.
    pub n_failed: usize,
}

/// Count the votes of successful calls and pick the most common answer.
///
/// Ties go to the answer that was seen first. When every call failed, the
/// first error is returned.
///
/// # Panics
///
/// Panics if `results` is empty.
pub fn majority_vote<B, E>(results: Vec<Result<B, E>>) -> Result<VoteOutcome<B>, E>
where
    B: Ballot + Clone,
{
    assert!(!results.is_empty(), "majority_vote needs at least one result");
    let n_calls = results.len();
    let mut ballots = Vec::new();
    let mut first_error = None;
    let mut n_failed = 0;
    for result in results {
        match result {
            Ok(ballot) => ballots.push(ballot),
            Err(err) => {
                n_failed += 1;
                first_error.get_or_insert(err);
            }
        }
    }
    if ballots.is_empty()
        && let Some(err) = first_error
    {
        return Err(err);
    }

    // (vote, count) in order of first appearance
    let mut tally: Vec<(String, usize)> = Vec::new();
    for ballot in &ballots {
        let vote = ballot.vote();
        match tally.iter_mut().find(|(v, _)| *v == vote) {
            Some((_, count)) => *count += 1,
            None => tally.push((vote, 1)),
        }
    }
    let mut winning: Option<&(String, usize)> = None;
    for entry in &tally {
        if winning.is_none_or(|best| entry.1 > best.1) {
            winning = Some(entry);
        }
    }
    let (voted_class, votes_for_winner) = match winning {
        Some((vote, count)) => (vote.clone(), *count),
        None => (String::new(), 0),
    };

    let winning_ballots: Vec<&B> = ballots
        .iter()
        .filter(|b| b.vote() == voted_class)
        .collect();
    let reasons: Vec<String> = winning_ballots
        .iter()
        .map(|b| b.reason().unwrap_or_else(|| "None".to_string()))
        .collect();
    let summary = format!(
        "'{voted_class}' was chosen since, in a multi-agent vote, it received \
         {votes_for_winner}/{n_calls} votes for the following reasons:\n{reasons:?}"
    );

    let winner = winning_ballots[0].clone().with_reason(summary);

    Ok(VoteOutcome {
        winner,
        votes_for_winner,
        ballots,
        n_failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Vote {
        answer: &'static str,
        reason: Option<String>,
    }

    impl Ballot for Vote {
        fn vote(&self) -> String {
            self.answer.to_string()
        }
        fn reason(&self) -> Option<String> {
            self.reason.clone()
        }
        fn with_reason(mut self, reason: String) -> Self {
            self.reason = Some(reason);
            self
        }
    }

    fn vote(answer: &'static str, reason: &str) -> Result<Vote, String> {
        Ok(Vote {
            answer,
            reason: Some(reason.to_string()),
        })
    }

    #[test]
    fn most_common_answer_wins_with_summary() {
        let outcome = majority_vote(vec![
            vote("A", "tree felled"),
            vote("B", "still standing"),
            vote("A", "logs in inventory"),
        ])
        .expect("vote");
        assert_eq!(outcome.winner.answer, "A");
        assert_eq!(outcome.votes_for_winner, 2);
        assert_eq!(outcome.ballots.len(), 3);
        let reason = outcome.winner.reason.expect("reason");
        assert!(
            reason.starts_with("'A' was chosen since, in a multi-agent vote, it received 2/3 votes")
        );
        assert!(reason.contains("\"tree felled\", \"logs in inventory\""));
    }

    #[test]
    fn ties_go_to_first_seen_answer() {
        let outcome = majority_vote(vec![vote("B", "x"), vote("A", "y")]).expect("vote");
        assert_eq!(outcome.winner.answer, "B");
    }

    #[test]
    fn failures_are_skipped_and_counted() {
        let outcome = majority_vote(vec![
            Err("timeout".to_string()),
            vote("A", "fine"),
        ])
        .expect("vote");
        assert_eq!(outcome.winner.answer, "A");
        assert_eq!(outcome.n_failed, 1);
        assert!(outcome.winner.reason.expect("reason").contains("1/2 votes"));
    }

    #[test]
    fn all_failures_return_first_error() {
        let result = majority_vote::<Vote, String>(vec![
            Err("first".to_string()),
            Err("second".to_string()),
        ]);
        assert_eq!(result.unwrap_err(), "first");
    }
}
