use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use duel_core::challenge::{
    Challenge, ChallengeLibrary, Difficulty, TestCase, MAX_TIME_LIMIT_SECS,
};
use duel_core::errors::LibraryError;
use duel_core::ids::ChallengeId;

/// Challenge library held in memory, seeded with the built-in set and
/// optionally extended from a JSON file (an array of challenges).
#[derive(Clone, Debug, Default)]
pub struct InMemoryLibrary {
    challenges: HashMap<ChallengeId, Challenge>,
}

impl InMemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut library = Self::new();
        for challenge in builtin_challenges() {
            library.insert(challenge);
        }
        library
    }

    /// Built-ins plus every challenge in `path`. File entries replace
    /// built-ins with the same id.
    pub fn with_file(path: &Path) -> Result<Self, LibraryError> {
        let mut library = Self::builtin();
        let loaded = load_file(path)?;
        info!(path = %path.display(), count = loaded.len(), "loaded challenge library");
        for challenge in loaded {
            library.insert(challenge);
        }
        Ok(library)
    }

    pub fn insert(&mut self, challenge: Challenge) {
        self.challenges.insert(challenge.id.clone(), challenge);
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

fn load_file(path: &Path) -> Result<Vec<Challenge>, LibraryError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| LibraryError::Unavailable(format!("{}: {e}", path.display())))?;
    let challenges: Vec<Challenge> = serde_json::from_str(&content)
        .map_err(|e| LibraryError::Unavailable(format!("{}: {e}", path.display())))?;
    if let Some(c) = challenges
        .iter()
        .find(|c| c.time_limit_secs > MAX_TIME_LIMIT_SECS)
    {
        return Err(LibraryError::Unavailable(format!(
            "{}: challenge {} asks for {}s, above the {MAX_TIME_LIMIT_SECS}s limit",
            path.display(),
            c.id,
            c.time_limit_secs
        )));
    }
    Ok(challenges)
}

#[async_trait]
impl ChallengeLibrary for InMemoryLibrary {
    async fn get_challenge(&self, id: &ChallengeId) -> Result<Challenge, LibraryError> {
        self.challenges
            .get(id)
            .cloned()
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))
    }
}

fn builtin_challenges() -> Vec<Challenge> {
    vec![
        Challenge {
            id: ChallengeId::from_raw("c1"),
            title: "Two Sum".into(),
            description: "Given an array of integers nums and an integer target, return indices of the two numbers such that they add up to target.".into(),
            difficulty: Difficulty::Easy,
            category: "arrays".into(),
            initial_code: "function twoSum(nums, target) {\n  // Your code here\n}".into(),
            test_cases: vec![
                TestCase::visible("[2, 7, 11, 15], 9", "[0, 1]"),
                TestCase::visible("[3, 2, 4], 6", "[1, 2]"),
                TestCase::hidden("[3, 3], 6", "[0, 1]"),
            ],
            time_limit_secs: 60,
            points: 100,
        },
        Challenge {
            id: ChallengeId::from_raw("c2"),
            title: "Valid Palindrome".into(),
            description: "Given a string s, determine if it is a palindrome, considering only alphanumeric characters and ignoring cases.".into(),
            difficulty: Difficulty::Easy,
            category: "strings".into(),
            initial_code: "function isPalindrome(s) {\n  // Your code here\n}".into(),
            test_cases: vec![
                TestCase::visible("\"A man, a plan, a canal: Panama\"", "true"),
                TestCase::visible("\"race a car\"", "false"),
                TestCase::hidden("\" \"", "true"),
            ],
            time_limit_secs: 60,
            points: 100,
        },
        Challenge {
            id: ChallengeId::from_raw("c3"),
            title: "Merge Intervals".into(),
            description: "Given an array of intervals where intervals[i] = [starti, endi], merge all overlapping intervals.".into(),
            difficulty: Difficulty::Medium,
            category: "arrays".into(),
            initial_code: "function merge(intervals) {\n  // Your code here\n}".into(),
            test_cases: vec![
                TestCase::visible("[[1,3],[2,6],[8,10],[15,18]]", "[[1,6],[8,10],[15,18]]"),
                TestCase::visible("[[1,4],[4,5]]", "[[1,5]]"),
            ],
            time_limit_secs: 60,
            points: 200,
        },
        Challenge {
            id: ChallengeId::from_raw("c4"),
            title: "LRU Cache".into(),
            description: "Design a data structure that follows the constraints of a Least Recently Used (LRU) cache.".into(),
            difficulty: Difficulty::Hard,
            category: "design".into(),
            initial_code: "class LRUCache {\n  constructor(capacity) {\n  }\n\n  get(key) {\n  }\n\n  put(key, value) {\n  }\n}".into(),
            test_cases: vec![TestCase::visible(
                "[\"LRUCache\", \"put\", \"put\", \"get\", \"put\", \"get\", \"put\", \"get\", \"get\", \"get\"]\n[[2], [1, 1], [2, 2], [1], [3, 3], [2], [4, 4], [1], [3], [4]]",
                "[null, null, null, 1, null, -1, null, -1, 3, 4]",
            )],
            time_limit_secs: 60,
            points: 300,
        },
    ]
}
