diesel::table! {
    user (id) {
        id -> Integer,
        name -> Text,
        hashed_password -> Text,
        is_host -> Bool,
        creation_instant -> Timestamp,
    }
}

diesel::table! {
    challenge (id) {
        id -> Integer,
        language -> Text,
        index_num -> Integer,
        slug -> Text,
        title -> Text,
        difficulty -> Text,
        points -> Integer,
        test_cases_json -> Text,
        is_active -> Bool,
        submission_count -> Integer,
        creation_instant -> Timestamp,
    }
}

diesel::table! {
    submission (uuid) {
        uuid -> Text,
        challenge_id -> Integer,
        user_id -> Integer,
        battle_id -> Nullable<Integer>,
        language -> Text,
        source_text -> Text,
        status -> Text,
        test_results_json -> Text,
        time_wall_ms -> BigInt,
        points_earned -> Integer,
        is_first_solve -> Bool,
        submission_instant -> Timestamp,
    }
}

diesel::table! {
    battle (id) {
        id -> Integer,
        name -> Text,
        challenge_id -> Integer,
        start_instant -> Timestamp,
        end_instant -> Timestamp,
        creation_user_id -> Integer,
        creation_instant -> Timestamp,
    }
}

diesel::joinable!(submission -> challenge (challenge_id));
diesel::joinable!(submission -> user (user_id));
diesel::joinable!(battle -> challenge (challenge_id));

diesel::allow_tables_to_appear_in_same_query!(user, challenge, submission, battle,);
