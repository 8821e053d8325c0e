//! Property tests for window expiry at the state level: the recent counter
//! always equals the number of clicks still inside the window.

use docrank::state::State;
use docrank::Document;
use proptest::prelude::*;
use std::collections::HashMap;

const WINDOW: usize = 600;
const IDS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Clone)]
enum Op {
    Click(usize),
    Advance(i64),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            5 => (0usize..IDS.len()).prop_map(Op::Click),
            // Mix small steps with jumps past the whole window.
            2 => (1i64..250).prop_map(Op::Advance),
            1 => (550i64..1500).prop_map(Op::Advance),
        ],
        0..200,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn recent_equals_clicks_inside_window(ops in arb_ops()) {
        let start = 10_000i64;
        let mut st = State::new(WINDOW, start);
        for id in IDS {
            st.upsert_doc(Document::new(id, "", ""));
        }

        let mut now = start;
        let mut clicks: HashMap<&str, Vec<i64>> = HashMap::new();
        for op in &ops {
            match *op {
                Op::Click(i) => {
                    st.click(IDS[i], now);
                    clicks.entry(IDS[i]).or_default().push(now);
                }
                Op::Advance(secs) => {
                    now += secs;
                    st.advance_recent_to(now);
                }
            }
            st.debug_validate();

            for id in IDS {
                let expected = clicks
                    .get(id)
                    .map(|ts| ts.iter().filter(|&&t| t > now - WINDOW as i64).count() as u64)
                    .unwrap_or(0);
                prop_assert_eq!(st.recent_count_of(id), expected, "id {}", id);
            }
        }

        // Totals never expire.
        for id in IDS {
            let total = clicks.get(id).map(|t| t.len() as u64).unwrap_or(0);
            prop_assert_eq!(st.total_count_of(id), total);
        }

        // Far past the window everything recent is gone.
        st.advance_recent_to(now + WINDOW as i64 + 1);
        prop_assert!(st.top_recent(0).is_empty());
        st.debug_validate();
    }
}
