pub mod player;
pub mod score;

/// Column list for `score` rows, in `Score` field order.
pub const SCORE_FIELDS: &str = r#"
    id,
    player_id,
    song_hash,
    difficulty,
    score,
    song_name,
    song_artist,
    song_mapper,
    image_url,
    map_url,
    created_at,
    updated_at
"#;

/// Same as [`SCORE_FIELDS`] but qualified with the `s` alias, plus the owning player's ids from
/// the `p` alias. Rows selected with this decode as `LeaderboardEntry`.
pub const ENTRY_FIELDS: &str = r#"
    s.id,
    s.player_id,
    s.song_hash,
    s.difficulty,
    s.score,
    s.song_name,
    s.song_artist,
    s.song_mapper,
    s.image_url,
    s.map_url,
    s.created_at,
    s.updated_at,
    p.leaderboard_id,
    p.mention_id
"#;

pub const PLAYER_FIELDS: &str = r#"
    account_id,
    leaderboard_id,
    mention_id,
    created_at
"#;
