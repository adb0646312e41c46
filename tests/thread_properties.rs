use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};
use forum_thread::forum::{Attachment, Post};
use forum_thread::linearize;

const AUTHORS: [&str; 4] = ["amy", "Bob", "cat", "dan"];

/// Small deterministic generator so failures reproduce from the seed alone.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

/// Random forum with no reply cycles: explicit references and mentions only ever point at
/// older posts (or at ids that do not exist).
fn acyclic_forum(seed: u64) -> Vec<Post> {
    let mut rng = Lcg(seed);
    let count = 1 + rng.below(24) as usize;
    let mut posts = Vec::with_capacity(count);
    for i in 0..count {
        let author = AUTHORS[rng.below(AUTHORS.len() as u64) as usize];
        let mut message = match rng.below(6) {
            0 => String::new(),
            1 => "   ".to_string(),
            _ => format!("note {i}"),
        };
        if rng.below(3) == 0 {
            let target = AUTHORS[rng.below(AUTHORS.len() as u64) as usize].to_uppercase();
            message = format!("@{target} {message}");
        }
        let reply_to = match rng.below(4) {
            0 if i > 0 => Some(format!("p{}", rng.below(i as u64))),
            1 => Some("missing".to_string()),
            _ => None,
        };
        let mut post = Post {
            id: (rng.below(10) != 0).then(|| format!("p{i}")),
            created_by: Some(author.to_string()),
            message,
            // Timestamps never decrease with position, and neighbours may tie.
            timestamp: Utc.timestamp_opt(1_700_000_000 + (i as i64 / 2) * 60, 0).unwrap(),
            reply_to,
            ..Post::default()
        };
        if rng.below(5) == 0 {
            post.metadata.attachments.push(Attachment {
                kind: "image".into(),
                url: format!("https://ik.imagekit.io/{i}.png"),
                name: None,
            });
        }
        posts.push(post);
    }
    posts
}

fn ids(posts: &[Post]) -> Vec<String> {
    linearize(posts)
        .iter()
        .map(|entry| entry.post.id.clone().unwrap())
        .collect()
}

#[test]
fn every_valid_post_appears_once() {
    for seed in 0..300 {
        let posts = acyclic_forum(seed);
        let output = ids(&posts);
        let unique: HashSet<&String> = output.iter().collect();
        assert_eq!(unique.len(), output.len(), "seed {seed}: duplicate entry");

        let expected: HashSet<String> = posts
            .iter()
            .filter(|post| post.is_valid())
            .filter_map(|post| post.id.clone())
            .collect();
        let got: HashSet<String> = output.into_iter().collect();
        assert_eq!(got, expected, "seed {seed}");
    }
}

#[test]
fn parents_precede_children() {
    for seed in 0..300 {
        let posts = acyclic_forum(seed);
        let entries = linearize(&posts);
        let position: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.post.id.as_deref().unwrap(), pos))
            .collect();
        for (pos, entry) in entries.iter().enumerate() {
            if let Some(parent) = entry.parent {
                let parent_pos = position[parent.id.as_deref().unwrap()];
                assert!(parent_pos < pos, "seed {seed}: parent after child");
            }
        }
    }
}

#[test]
fn explicit_reference_beats_mention() {
    for seed in 0..300 {
        let posts = acyclic_forum(seed);
        let valid: HashSet<&str> = posts
            .iter()
            .filter(|post| post.is_valid())
            .filter_map(|post| post.id.as_deref())
            .collect();
        for entry in linearize(&posts) {
            if let Some(reply_to) = entry.post.reply_to.as_deref() {
                let parent = entry.parent.and_then(|p| p.id.as_deref());
                if valid.contains(reply_to) {
                    assert_eq!(parent, Some(reply_to), "seed {seed}");
                } else {
                    assert_eq!(parent, None, "seed {seed}: dangling reply must be top-level");
                }
            }
        }
    }
}

#[test]
fn top_level_blocks_are_chronological() {
    for seed in 0..300 {
        let posts = acyclic_forum(seed);
        let roots: Vec<_> = linearize(&posts)
            .into_iter()
            .filter(|entry| entry.parent.is_none())
            .map(|entry| entry.post.timestamp)
            .collect();
        assert!(
            roots.windows(2).all(|pair| pair[0] <= pair[1]),
            "seed {seed}: roots out of order"
        );
    }
}

#[test]
fn depth_counts_explicit_hops() {
    for seed in 0..300 {
        let posts = acyclic_forum(seed);
        let entries = linearize(&posts);
        let depth: HashMap<&str, usize> = entries
            .iter()
            .map(|entry| (entry.post.id.as_deref().unwrap(), entry.depth))
            .collect();
        for entry in &entries {
            let expected = match entry.post.reply_to.as_deref() {
                Some(reply_to) => depth.get(reply_to).map(|d| d + 1).unwrap_or(0),
                None => 0,
            };
            assert_eq!(entry.depth, expected, "seed {seed}");
        }
    }
}

#[test]
fn output_is_deterministic() {
    for seed in 0..100 {
        let posts = acyclic_forum(seed);
        assert_eq!(linearize(&posts), linearize(&posts), "seed {seed}");
    }
}

#[test]
fn cycles_terminate_with_every_post_placed() {
    let mut posts = Vec::new();
    for i in 0..6 {
        posts.push(Post {
            id: Some(format!("c{i}")),
            created_by: Some("amy".into()),
            message: format!("loop {i}"),
            timestamp: Utc.timestamp_opt(1_700_000_000 + i * 10, 0).unwrap(),
            reply_to: Some(format!("c{}", (i + 1) % 6)),
            ..Post::default()
        });
    }
    posts.push(Post {
        id: Some("root".into()),
        created_by: Some("bob".into()),
        message: "standalone".into(),
        timestamp: Utc.timestamp_opt(1_800_000_000, 0).unwrap(),
        ..Post::default()
    });

    let entries = linearize(&posts);
    assert_eq!(entries.len(), posts.len());
    assert_eq!(entries[0].post.id.as_deref(), Some("root"));
    assert!(entries.iter().all(|entry| entry.depth == 0));
}

fn scenario_post(id: &str, author: &str, message: &str, ts: i64, reply_to: Option<&str>) -> Post {
    Post {
        id: Some(id.into()),
        created_by: Some(author.into()),
        message: message.into(),
        timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        reply_to: reply_to.map(str::to_string),
        ..Post::default()
    }
}

fn summary(posts: &[Post]) -> Vec<(String, usize)> {
    linearize(posts)
        .iter()
        .map(|entry| (entry.post.id.clone().unwrap(), entry.depth))
        .collect()
}

#[test]
fn literal_scenarios() {
    let post = scenario_post;

    assert_eq!(
        summary(&[post("1", "amy", "hello", 100, None)]),
        vec![("1".to_string(), 0)]
    );
    assert_eq!(
        summary(&[
            post("1", "amy", "hi", 100, None),
            post("2", "bob", "@amy yo", 200, Some("1")),
        ]),
        vec![("1".to_string(), 0), ("2".to_string(), 1)]
    );
    assert_eq!(
        summary(&[
            post("1", "amy", "hi", 100, None),
            post("2", "bob", "@amy yo", 200, None),
        ]),
        vec![("1".to_string(), 0), ("2".to_string(), 0)]
    );
    assert_eq!(
        summary(&[
            post("1", "amy", "a", 100, Some("2")),
            post("2", "bob", "b", 200, Some("1")),
        ]),
        vec![("1".to_string(), 0), ("2".to_string(), 0)]
    );
    assert!(summary(&[post("1", "amy", "", 100, None)]).is_empty());
}
