use questlog_schemas::{
    BranchingPoint, ChainDependency, ChainId, Consequence, DependencyType, Quest, QuestChain,
    QuestId, QuestStatus, UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::error::Result;
use crate::store::QuestStore;

/// Minimum chain size for a fully-completed chain to count as an epic
const EPIC_MIN_MEMBERS: usize = 5;

/// Derives quest chains from a snapshot of a user's quests.
///
/// Pure with respect to its input: the same quest set always yields the same
/// chains, so chains are always rebuilt in full rather than incrementally
/// patched.
pub struct ChainBuilder;

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Fetch one consistent snapshot of the user's quests and build chains
    pub fn chains_for(&self, store: &QuestStore, user_id: &UserId) -> Result<Vec<QuestChain>> {
        let quests = store.list_quests(user_id)?;
        let chains = self.build_chains(&quests);

        debug!(
            "Built {} chain(s) from {} quest(s) for user {}",
            chains.len(),
            quests.len(),
            user_id
        );
        Ok(chains)
    }

    /// Group quests into chains and derive dependency data.
    ///
    /// Two grouping strategies are applied and merged: explicit
    /// `quest_chain_id` membership, and parent/child trees collected from
    /// each root. Tree members land under the root's chain id when it has
    /// one, otherwise under a key synthesized from the root id.
    pub fn build_chains(&self, quests: &[Quest]) -> Vec<QuestChain> {
        let by_id: HashMap<&QuestId, &Quest> = quests.iter().map(|q| (&q.id, q)).collect();

        let mut children: HashMap<&QuestId, Vec<&QuestId>> = HashMap::new();
        for quest in quests {
            if let Some(ref parent) = quest.parent_quest_id {
                children.entry(parent).or_default().push(&quest.id);
            }
        }

        // BTreeMap keyed by chain id keeps the output order reproducible
        let mut groups: BTreeMap<ChainId, Vec<QuestId>> = BTreeMap::new();

        // Strategy 1: explicit chain membership
        for quest in quests {
            if let Some(ref chain_id) = quest.quest_chain_id {
                push_unique(groups.entry(chain_id.clone()).or_default(), &quest.id);
            }
        }

        // Strategy 2: implicit parent/child trees. A quest whose parent id
        // no longer resolves is treated as a root rather than dropped.
        for quest in quests {
            let is_root = match quest.parent_quest_id {
                None => true,
                Some(ref parent) => !by_id.contains_key(parent),
            };
            if !is_root {
                continue;
            }

            let mut members = Vec::new();
            collect_tree(&quest.id, &children, &mut members);

            let key = quest
                .quest_chain_id
                .clone()
                .unwrap_or_else(|| ChainId(format!("chain_{}", quest.id.0)));

            let group = groups.entry(key).or_default();
            for member in &members {
                push_unique(group, member);
            }
        }

        groups
            .into_iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(chain_id, members)| build_chain(chain_id, &members, &by_id, &children))
            .collect()
    }
}

fn collect_tree(id: &QuestId, children: &HashMap<&QuestId, Vec<&QuestId>>, out: &mut Vec<QuestId>) {
    // Parent edges are enforced acyclic at write time; the contains check
    // only guards against malformed imported data
    if out.contains(id) {
        return;
    }
    out.push(id.clone());

    if let Some(kids) = children.get(id) {
        for kid in kids {
            collect_tree(kid, children, out);
        }
    }
}

fn push_unique(members: &mut Vec<QuestId>, id: &QuestId) {
    if !members.contains(id) {
        members.push(id.clone());
    }
}

fn build_chain(
    chain_id: ChainId,
    members: &[QuestId],
    by_id: &HashMap<&QuestId, &Quest>,
    children: &HashMap<&QuestId, Vec<&QuestId>>,
) -> QuestChain {
    let member_set: HashSet<&QuestId> = members.iter().collect();

    let mut dependencies = Vec::new();
    let mut branching_points = Vec::new();
    let mut consequences = Vec::new();

    for member in members {
        let Some(quest) = by_id.get(member) else {
            continue;
        };

        // Dependencies mirror parent/child edges: the child is blocked on
        // its parent
        if let Some(ref parent) = quest.parent_quest_id {
            if member_set.contains(parent) {
                dependencies.push(ChainDependency {
                    quest: member.clone(),
                    depends_on: parent.clone(),
                    dependency_type: DependencyType::Blocks,
                });
            }
        }

        let direct_children: Vec<QuestId> = children
            .get(member)
            .map(|kids| {
                kids.iter()
                    .filter(|kid| member_set.contains(**kid))
                    .map(|kid| (*kid).clone())
                    .collect()
            })
            .unwrap_or_default();

        if direct_children.len() > 1 {
            branching_points.push(BranchingPoint {
                quest: member.clone(),
                branches: direct_children.clone(),
            });
        }

        // A completed quest unlocks its children and any member tied to the
        // same external goal
        if quest.status == QuestStatus::Completed {
            let mut unlocks = direct_children;
            if let Some(ref goal_id) = quest.related_goal_id {
                for other in members {
                    if other == member {
                        continue;
                    }
                    let shares_goal = by_id
                        .get(other)
                        .and_then(|q| q.related_goal_id.as_ref())
                        .map(|g| g == goal_id)
                        .unwrap_or(false);
                    if shares_goal && !unlocks.contains(other) {
                        unlocks.push(other.clone());
                    }
                }
            }
            if !unlocks.is_empty() {
                consequences.push(Consequence {
                    quest: member.clone(),
                    unlocks,
                });
            }
        }
    }

    let total = members.len();
    let completed = members
        .iter()
        .filter(|m| by_id.get(*m).map(|q| q.status == QuestStatus::Completed) == Some(true))
        .count();
    let active: Vec<u8> = members
        .iter()
        .filter_map(|m| by_id.get(m))
        .filter(|q| q.status == QuestStatus::Active)
        .map(|q| q.progress_percentage)
        .collect();

    let base = 100.0 * completed as f64 / total as f64;
    let active_contribution = if active.is_empty() {
        0.0
    } else {
        let avg = active.iter().map(|p| *p as f64).sum::<f64>() / active.len() as f64;
        avg * active.len() as f64 / total as f64
    };
    let storyline_progress = round2((base + active_contribution).min(100.0));

    let epic_completion = total >= EPIC_MIN_MEMBERS && completed == total;

    let (name, description) = describe_chain(members, by_id, completed, total);

    QuestChain {
        id: chain_id,
        name,
        description,
        members: members.to_vec(),
        dependencies,
        branching_points,
        consequences,
        storyline_progress,
        epic_completion,
    }
}

/// Deterministic naming from the first member's category (falling back to
/// its quest type) plus a completed/total ratio string
fn describe_chain(
    members: &[QuestId],
    by_id: &HashMap<&QuestId, &Quest>,
    completed: usize,
    total: usize,
) -> (String, String) {
    let theme = members
        .first()
        .and_then(|m| by_id.get(m))
        .map(|q| {
            q.category
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(q.quest_type.as_str())
                .to_string()
        })
        .unwrap_or_else(|| "quest".to_string());

    let name = format!("The {} saga", capitalize(&theme));
    let description = format!("{} storyline, {}/{} quests completed", capitalize(&theme), completed, total);
    (name, description)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
