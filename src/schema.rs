// Database schema definitions
diesel::table! {
    users (id) {
        id -> Int4,
        username -> Varchar,
        password_hash -> Varchar,
        name -> Varchar,
        email -> Varchar,
        phone -> Nullable<Varchar>,
        role -> Varchar,
        profile_image -> Nullable<Varchar>,
        address -> Nullable<Varchar>,
        city -> Nullable<Varchar>,
        state -> Nullable<Varchar>,
        zip_code -> Nullable<Varchar>,
        created_at -> Timestamp,
        last_login -> Nullable<Timestamp>,
    }
}

diesel::table! {
    drivers (id) {
        id -> Int4,
        user_id -> Int4,
        vehicle_model -> Varchar,
        license_plate -> Varchar,
        vehicle_type -> Varchar,
        location -> Varchar,
        is_available -> Bool,
        average_rating -> Float8,
        total_ratings -> Int4,
        balance -> Numeric,
        document -> Nullable<Varchar>,
        is_highlighted -> Bool,
        highlight_end_date -> Nullable<Timestamp>,
        subscription_type -> Nullable<Varchar>,
        subscription_end_date -> Nullable<Timestamp>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    freights (id) {
        id -> Int4,
        user_id -> Int4,
        driver_id -> Nullable<Int4>,
        pickup_address -> Varchar,
        delivery_address -> Varchar,
        pickup_date -> Date,
        pickup_time -> Time,
        package_type -> Varchar,
        instructions -> Nullable<Text>,
        status -> Varchar,
        amount -> Numeric,
        created_at -> Timestamp,
        accepted_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        canceled_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    ratings (id) {
        id -> Int4,
        freight_id -> Int4,
        user_id -> Int4,
        driver_id -> Int4,
        rating -> Int4,
        comment -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    transactions (id) {
        id -> Int4,
        transaction_type -> Varchar,
        amount -> Numeric,
        status -> Varchar,
        user_id -> Nullable<Int4>,
        driver_id -> Nullable<Int4>,
        freight_id -> Nullable<Int4>,
        description -> Nullable<Varchar>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    withdrawal_requests (id) {
        id -> Int4,
        driver_id -> Int4,
        amount -> Numeric,
        status -> Varchar,
        request_date -> Timestamp,
        processed_date -> Nullable<Timestamp>,
        processed_by -> Nullable<Int4>,
        bank_info -> Nullable<Varchar>,
        pix_key -> Nullable<Varchar>,
        notes -> Nullable<Text>,
    }
}

diesel::table! {
    system_settings (id) {
        id -> Int4,
        key -> Varchar,
        value -> Varchar,
        category -> Varchar,
        updated_by -> Nullable<Int4>,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    refresh_tokens (id) {
        id -> Int4,
        user_id -> Int4,
        token -> Varchar,
        expires_at -> Timestamp,
        created_at -> Timestamp,
    }
}

diesel::joinable!(drivers -> users (user_id));
diesel::joinable!(freights -> users (user_id));
diesel::joinable!(freights -> drivers (driver_id));
diesel::joinable!(ratings -> freights (freight_id));
diesel::joinable!(withdrawal_requests -> drivers (driver_id));
diesel::joinable!(refresh_tokens -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users, drivers, freights, ratings, transactions,
    withdrawal_requests, system_settings, refresh_tokens,
);
