//! Upstream API payloads shared by the integration tests.

#![allow(dead_code)]

pub const TOP_STORIES_JSON: &str = "[101, 102, 103, 104]";

pub const STORY_101_JSON: &str = r#"{
  "by": "dhouston",
  "descendants": 71,
  "id": 101,
  "score": 111,
  "time": 1710590400,
  "title": "My YC app: Dropbox - Throw away your USB drive",
  "type": "story",
  "url": "http://www.getdropbox.com/u/2/screencast.html"
}"#;

pub const ASK_102_JSON: &str = r#"{
  "by": "tel",
  "descendants": 16,
  "id": 102,
  "score": 25,
  "time": 1710594000,
  "title": "Ask HN: The Arc Effect",
  "type": "story"
}"#;

pub const JOB_103_JSON: &str = r#"{
  "by": "justin",
  "id": 103,
  "score": 6,
  "time": 1710597600,
  "title": "Justin.tv is looking for a Lead Flash Engineer!",
  "type": "job"
}"#;

pub const DEAD_104_JSON: &str = r#"{
  "by": "spammer",
  "dead": true,
  "id": 104,
  "time": 1710601200,
  "title": "Buy cheap watches",
  "type": "story"
}"#;

pub const FRONT_PAGE_JSON: &str = r#"{
  "hits": [
    {
      "objectID": "201",
      "title": "Show HN: A tiny search engine",
      "url": "https://example.org/search",
      "author": "pg",
      "points": 320,
      "num_comments": 88,
      "created_at_i": 1710590400
    },
    {
      "objectID": "202",
      "title": "Rust 1.77 released",
      "url": "https://blog.rust-lang.org/2024/03/21/Rust-1.77.0.html",
      "author": "steveklabnik",
      "points": 512,
      "num_comments": 140,
      "created_at_i": 1710594000
    },
    {
      "objectID": "not-a-number",
      "title": "Broken hit",
      "author": "nobody",
      "created_at_i": 1710594000
    }
  ],
  "nbHits": 3
}"#;

/// Valid ids in `TOP_STORIES_JSON`, in order.
pub const VALID_TOP_IDS: [u64; 3] = [101, 102, 103];

pub fn item_payload(id: u64) -> &'static str {
    match id {
        101 => STORY_101_JSON,
        102 => ASK_102_JSON,
        103 => JOB_103_JSON,
        104 => DEAD_104_JSON,
        _ => "null",
    }
}
