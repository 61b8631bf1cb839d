//! Store-level behaviour against a real Postgres. Each test gets a fresh
//! database from `#[sqlx::test]`, migrated from `./migrations`.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use studenthub_backend::attendance::{save_attendance_records, AttendanceWrite};
use studenthub_backend::marks::merge_mark_sheet;
use studenthub_backend::models::attendance::AttendanceStatus;
use studenthub_backend::models::marks::{ExamType, MarkEntry, MarkSheetKey, SheetEntries};
use studenthub_backend::models::role::Role;
use studenthub_backend::notes::{delete_own_note, insert_note, update_own_note, NoteInput};
use studenthub_backend::password_reset::{change_password_by_login_id, ChangeOutcome};
use studenthub_backend::users::{
    authenticate, hash_password, verify_password, LoginError, LoginRejection, LoginRequest,
};

const DOMAIN: &str = "studenthub.edu";

async fn insert_user(
    pool: &PgPool,
    login_id: &str,
    role: Role,
    password: &str,
    linked_student_id: Option<&str>,
) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (login_id, email, role, name, password_hash, linked_student_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id"
    )
    .bind(login_id)
    .bind(format!("{}@{}", login_id.to_lowercase(), DOMAIN))
    .bind(role)
    .bind(format!("User {}", login_id))
    .bind(hash_password(password).unwrap())
    .bind(linked_student_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn login(identifier: &str, password: &str, role: Role) -> LoginRequest {
    LoginRequest {
        identifier: identifier.to_string(),
        password: password.to_string(),
        role,
    }
}

fn rejection(result: Result<impl std::fmt::Debug, LoginError>) -> LoginRejection {
    match result {
        Err(LoginError::Rejected(rejection)) => rejection,
        other => panic!("expected a rejection, got {:?}", other),
    }
}

fn entry(marks: f64) -> MarkEntry {
    MarkEntry {
        marks,
        grade: "A".to_string(),
        remarks: None,
        last_updated: Utc::now(),
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL pointing at Postgres"]
async fn login_with_wrong_role_is_rejected(pool: PgPool) {
    insert_user(&pool, "CS20230001", Role::Student, "Password123!", None).await;

    let result = authenticate(&pool, &login("CS20230001", "Password123!", Role::Teacher), DOMAIN).await;
    assert_eq!(rejection(result), LoginRejection::RoleMismatch(Role::Teacher));

    let session = authenticate(&pool, &login("CS20230001", "Password123!", Role::Student), DOMAIN)
        .await
        .unwrap();
    assert_eq!(session.login_id, "CS20230001");
    assert_eq!(session.role, Role::Student);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL pointing at Postgres"]
async fn unlinked_parent_cannot_sign_in(pool: PgPool) {
    insert_user(&pool, "P-CS20230009", Role::Parent, "Password123!", None).await;

    let result = authenticate(&pool, &login("P-CS20230009", "Password123!", Role::Parent), DOMAIN).await;
    assert_eq!(rejection(result), LoginRejection::ParentNotLinked);

    let result = authenticate(&pool, &login("P-CS20230404", "Password123!", Role::Parent), DOMAIN).await;
    assert_eq!(rejection(result), LoginRejection::InvalidCredentials);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL pointing at Postgres"]
async fn pending_password_takes_over_at_next_login(pool: PgPool) {
    let id = insert_user(&pool, "CS20230002", Role::Student, "MyOwnSecret", None).await;

    let outcome = change_password_by_login_id(&pool, "CS20230002", "BrandNew99").await.unwrap();
    assert_eq!(outcome, ChangeOutcome::Pending);

    // The old password still signs in once, and swaps in the pending one.
    let session = authenticate(&pool, &login("CS20230002", "MyOwnSecret", Role::Student), DOMAIN)
        .await
        .unwrap();
    assert!(session.password_changed);

    let (hash, pending, reset_required): (String, Option<String>, bool) = sqlx::query_as(
        "SELECT password_hash, pending_password_hash, password_reset_required FROM users WHERE id = $1"
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(verify_password("BrandNew99", &hash));
    assert!(pending.is_none());
    assert!(!reset_required);

    let result = authenticate(&pool, &login("CS20230002", "MyOwnSecret", Role::Student), DOMAIN).await;
    assert_eq!(rejection(result), LoginRejection::InvalidCredentials);
    assert!(authenticate(&pool, &login("CS20230002", "BrandNew99", Role::Student), DOMAIN)
        .await
        .is_ok());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL pointing at Postgres"]
async fn second_attendance_write_replaces_first(pool: PgPool) {
    let teacher = insert_user(&pool, "T-0001", Role::Teacher, "Password123!", None).await;
    let student = insert_user(&pool, "CS20230003", Role::Student, "Password123!", None).await;
    let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

    let first = [AttendanceWrite { student_id: student, status: AttendanceStatus::Absent, remarks: None }];
    save_attendance_records(&pool, "Algorithms", date, &first, teacher, "Jane Smith")
        .await
        .unwrap();

    let second = [AttendanceWrite {
        student_id: student,
        status: AttendanceStatus::Late,
        remarks: Some("bus".to_string()),
    }];
    save_attendance_records(&pool, "Algorithms", date, &second, teacher, "Jane Smith")
        .await
        .unwrap();

    let rows: Vec<(AttendanceStatus, Option<String>)> = sqlx::query_as(
        "SELECT status, remarks FROM attendance WHERE student_id = $1 AND subject = $2 AND date = $3"
    )
    .bind(student)
    .bind("Algorithms")
    .bind(date)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows, vec![(AttendanceStatus::Late, Some("bus".to_string()))]);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL pointing at Postgres"]
async fn partial_mark_sheet_save_keeps_other_students(pool: PgPool) {
    let key = MarkSheetKey {
        subject: "Algorithms".to_string(),
        semester: 3,
        exam_type: ExamType::Final,
        year: 2024,
    };

    let mut first = SheetEntries::new();
    first.insert("3".to_string(), entry(70.0));
    first.insert("4".to_string(), entry(55.0));
    merge_mark_sheet(&pool, &key, &first).await.unwrap();

    let mut second = SheetEntries::new();
    second.insert("4".to_string(), entry(88.0));
    let merged = merge_mark_sheet(&pool, &key, &second).await.unwrap();

    assert_eq!(merged.len(), 2);
    assert_eq!(merged["3"].marks, 70.0);
    assert_eq!(merged["4"].marks, 88.0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL pointing at Postgres"]
async fn teachers_only_touch_their_own_notes(pool: PgPool) {
    let owner = insert_user(&pool, "T-0001", Role::Teacher, "Password123!", None).await;
    let other = insert_user(&pool, "T-0002", Role::Teacher, "Password123!", None).await;

    let input = NoteInput {
        title: "Sorting".to_string(),
        subject: "Algorithms".to_string(),
        google_drive_url: None,
    };
    let note = insert_note(&pool, &input, owner, "Jane Smith").await.unwrap();

    let edit = NoteInput { title: "Hijacked".to_string(), ..input.clone() };
    assert!(update_own_note(&pool, note.id, other, &edit).await.unwrap().is_none());
    assert!(!delete_own_note(&pool, note.id, other).await.unwrap());

    let updated = update_own_note(&pool, note.id, owner, &edit).await.unwrap().unwrap();
    assert_eq!(updated.title, "Hijacked");
    assert!(delete_own_note(&pool, note.id, owner).await.unwrap());
}
