// Copyright (c) The paceline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test plan: a suite tree plus the operations the scheduler needs.

use crate::{
    errors::{StructuralError, StructuralErrors},
    plan::{ProjectId, Suite, SuiteEntry, TestCase, TestCaseId},
};
use std::collections::{HashMap, HashSet};

/// The full set of discovered tests for one run.
///
/// A plan wraps the discovery tree and provides the queries the scheduler
/// needs: source-order iteration, structural validation, and restriction to an
/// explicit id set after shard filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct TestPlan {
    root: Suite,
}

impl TestPlan {
    /// Creates a plan from a discovery tree.
    pub fn new(root: Suite) -> Self {
        Self { root }
    }

    /// The root suite.
    pub fn root(&self) -> &Suite {
        &self.root
    }

    /// Number of test cases in the plan.
    pub fn test_count(&self) -> usize {
        self.root.test_count()
    }

    /// Iterates over all test cases in source order.
    pub fn iter_tests(&self) -> impl Iterator<Item = &TestCase> + '_ {
        TestCaseIter {
            stack: vec![self.root.entries.iter()],
        }
    }

    /// Distinct project ids in first-seen order.
    pub fn project_ids(&self) -> Vec<ProjectId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for test in self.iter_tests() {
            if seen.insert(test.project.clone()) {
                ids.push(test.project.clone());
            }
        }
        ids
    }

    /// Validates the plan's structure, collecting every problem before
    /// reporting.
    ///
    /// Two classes of problems are detected: duplicate full title paths within
    /// one source unit, and focus markers when `forbid_only` is set (the usual
    /// CI posture). Errors are returned in source order.
    pub fn validate(&self, forbid_only: bool) -> Result<(), StructuralErrors> {
        let mut errors = Vec::new();

        let mut seen_titles: HashMap<_, &TestCase> = HashMap::new();
        for test in self.iter_tests() {
            let key = (test.source_unit.clone(), test.title_path.join(" › "));
            if let Some(first) = seen_titles.get(&key) {
                errors.push(StructuralError::DuplicateTitle {
                    source_unit: test.source_unit.clone(),
                    title: test.display_name(),
                    first: first.location.clone(),
                    second: test.location.clone(),
                });
            } else {
                seen_titles.insert(key, test);
            }
        }

        if forbid_only {
            collect_focused(&self.root, &mut Vec::new(), &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StructuralErrors::new(errors))
        }
    }

    /// Restricts the plan to the given id set, in place.
    ///
    /// Suites stay in the tree even when all of their tests are removed; an
    /// empty id set therefore forces every suite to zero entries rather than
    /// leaving the plan untouched.
    pub fn retain_cases(&mut self, ids: &HashSet<TestCaseId>) {
        retain_in_suite(&mut self.root, ids);
    }
}

fn retain_in_suite(suite: &mut Suite, ids: &HashSet<TestCaseId>) {
    suite.entries.retain_mut(|entry| match entry {
        SuiteEntry::Test(test) => ids.contains(&test.id),
        SuiteEntry::Suite(child) => {
            retain_in_suite(child, ids);
            true
        }
    });
}

fn collect_focused(suite: &Suite, titles: &mut Vec<String>, errors: &mut Vec<StructuralError>) {
    if suite.only {
        errors.push(StructuralError::FocusedItem {
            title: titles.join(" › "),
            location: None,
        });
    }
    for entry in &suite.entries {
        match entry {
            SuiteEntry::Test(test) => {
                if test.only {
                    errors.push(StructuralError::FocusedItem {
                        title: test.display_name(),
                        location: Some(test.location.clone()),
                    });
                }
            }
            SuiteEntry::Suite(child) => {
                let pushed = !child.title.is_empty();
                if pushed {
                    titles.push(child.title.clone());
                }
                collect_focused(child, titles, errors);
                if pushed {
                    titles.pop();
                }
            }
        }
    }
}

struct TestCaseIter<'a> {
    stack: Vec<std::slice::Iter<'a, SuiteEntry>>,
}

impl<'a> Iterator for TestCaseIter<'a> {
    type Item = &'a TestCase;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(SuiteEntry::Test(test)) => return Some(test),
                Some(SuiteEntry::Suite(suite)) => self.stack.push(suite.entries.iter()),
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{SourceLocation, SuiteKind, SuiteMode};
    use pretty_assertions::assert_eq;

    fn test_at(id: &str, titles: &[&str], file: &str, line: u32) -> TestCase {
        TestCase::new(
            id,
            titles.iter().map(|t| (*t).to_owned()).collect(),
            SourceLocation::new(file, line, 1),
        )
    }

    fn sample_plan() -> TestPlan {
        let mut file = Suite::new(SuiteKind::File, "a.test.ts");
        file.push_test(test_at("t1", &["a.test.ts", "one"], "a.test.ts", 3));

        let mut describe = Suite::new(SuiteKind::Describe, "group");
        describe.set_mode(SuiteMode::Parallel);
        describe.push_test(test_at("t2", &["a.test.ts", "group", "two"], "a.test.ts", 7));
        describe.push_test(test_at("t3", &["a.test.ts", "group", "three"], "a.test.ts", 11));
        file.push_suite(describe);

        let mut root = Suite::new(SuiteKind::Root, "");
        root.push_suite(file);
        TestPlan::new(root)
    }

    #[test]
    fn iteration_is_source_order() {
        let plan = sample_plan();
        let ids: Vec<_> = plan.iter_tests().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t1", "t2", "t3"]);
        assert_eq!(plan.test_count(), 3);
    }

    #[test]
    fn duplicate_titles_within_a_source_unit_are_collected() {
        let mut file = Suite::new(SuiteKind::File, "a.test.ts");
        file.push_test(test_at("t1", &["a.test.ts", "same"], "a.test.ts", 3));
        file.push_test(test_at("t2", &["a.test.ts", "same"], "a.test.ts", 9));
        let mut root = Suite::new(SuiteKind::Root, "");
        root.push_suite(file);

        let errors = TestPlan::new(root).validate(false).unwrap_err();
        assert_eq!(errors.len(), 1);
        let message = errors.to_string();
        assert!(
            message.contains("duplicate title"),
            "unexpected message: {message}"
        );
        assert!(message.contains("a.test.ts:9:1"), "missing second location");
    }

    #[test]
    fn same_title_in_different_source_units_is_fine() {
        let mut file_a = Suite::new(SuiteKind::File, "a.test.ts");
        file_a.push_test(test_at("t1", &["same"], "a.test.ts", 3));
        let mut file_b = Suite::new(SuiteKind::File, "b.test.ts");
        file_b.push_test(test_at("t2", &["same"], "b.test.ts", 3));
        let mut root = Suite::new(SuiteKind::Root, "");
        root.push_suite(file_a);
        root.push_suite(file_b);

        assert!(TestPlan::new(root).validate(true).is_ok());
    }

    #[test]
    fn focus_markers_are_errors_only_when_forbidden() {
        let mut file = Suite::new(SuiteKind::File, "a.test.ts");
        let mut focused = test_at("t1", &["a.test.ts", "one"], "a.test.ts", 3);
        focused.set_only(true);
        file.push_test(focused);
        let mut root = Suite::new(SuiteKind::Root, "");
        root.push_suite(file);
        let plan = TestPlan::new(root);

        assert!(plan.validate(false).is_ok());
        let errors = plan.validate(true).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.to_string().contains("focus marker"));
    }

    #[test]
    fn all_problems_are_collected_in_one_pass() {
        let mut file = Suite::new(SuiteKind::File, "a.test.ts");
        let mut focused = test_at("t1", &["a.test.ts", "same"], "a.test.ts", 3);
        focused.set_only(true);
        file.push_test(focused);
        file.push_test(test_at("t2", &["a.test.ts", "same"], "a.test.ts", 9));
        let mut root = Suite::new(SuiteKind::Root, "");
        root.push_suite(file);

        let errors = TestPlan::new(root).validate(true).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn retaining_an_empty_id_set_clears_every_suite() {
        let mut plan = sample_plan();
        plan.retain_cases(&HashSet::new());
        assert_eq!(plan.test_count(), 0);
        // The tree structure itself is preserved.
        assert_eq!(plan.root().entries.len(), 1);
    }

    #[test]
    fn retaining_keeps_only_named_cases() {
        let mut plan = sample_plan();
        let ids = HashSet::from([TestCaseId::new("t2")]);
        plan.retain_cases(&ids);
        let remaining: Vec<_> = plan.iter_tests().map(|t| t.id.as_str()).collect();
        assert_eq!(remaining, ["t2"]);
    }
}
