//! 有向グラフの循環検出
//!
//! 再帰を使わない反復DFSで、訪問済み集合により各ノードを1回だけ展開します。

use std::collections::{BTreeMap, BTreeSet};

/// 隣接リストから循環を全て列挙
///
/// 各循環は開始ノードで閉じた形（`[a, b, a]`）で返します。
/// 同じ循環の回転は1つにまとめられ、最小のノードが先頭になります。
pub fn find_cycles(adjacency: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut seen_cycles: BTreeSet<Vec<String>> = BTreeSet::new();
    let mut cycles = Vec::new();

    for start in adjacency.keys() {
        if visited.contains(start.as_str()) {
            continue;
        }

        // (ノード, 次に見る隣接インデックス)
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        let mut on_path: Vec<&str> = vec![start.as_str()];
        visited.insert(start.as_str());

        while let Some((node, index)) = stack.last_mut() {
            let neighbours = adjacency.get(*node).map(Vec::as_slice).unwrap_or_default();
            let Some(next) = neighbours.get(*index) else {
                stack.pop();
                on_path.pop();
                continue;
            };
            *index += 1;
            let next = next.as_str();

            if let Some(pos) = on_path.iter().position(|n| *n == next) {
                let cycle = normalize(&on_path[pos..]);
                if seen_cycles.insert(cycle.clone()) {
                    cycles.push(cycle);
                }
            } else if visited.insert(next) {
                stack.push((next, 0));
                on_path.push(next);
            }
        }
    }

    cycles
}

fn normalize(path: &[&str]) -> Vec<String> {
    let min = path
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut cycle: Vec<String> = path[min..]
        .iter()
        .chain(path[..min].iter())
        .map(|n| n.to_string())
        .collect();
    if let Some(first) = cycle.first().cloned() {
        cycle.push(first);
    }
    cycle
}
