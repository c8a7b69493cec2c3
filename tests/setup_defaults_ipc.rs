
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn setup_defaults_and_patch_validation() {
    let workspace = temp_dir("coursedesk-setup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        setup["scheduling"]["defaultLessonDurationMinutes"],
        json!(45)
    );
    assert_eq!(setup["scheduling"]["patternSearchDays"], json!(14));
    assert_eq!(setup["scheduling"]["blockedSearchDays"], json!(30));
    assert_eq!(setup["portal"]["confirmDeletes"], json!(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "scheduling",
            "patch": { "defaultLessonDurationMinutes": 60, "defaultLessonMode": "combined" }
        }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(
        setup["scheduling"]["defaultLessonDurationMinutes"],
        json!(60)
    );
    assert_eq!(setup["scheduling"]["defaultLessonMode"], json!("combined"));

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "setup.update",
            json!({ "section": "scheduling", "patch": { "defaultLessonMode": "weekly" } }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "6",
            "setup.update",
            json!({ "section": "grading", "patch": {} }),
        ),
        "bad_params"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn pattern_upsert_uses_setup_default_duration() {
    let workspace = temp_dir("coursedesk-setup-duration");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "scheduling",
            "patch": { "defaultLessonDurationMinutes": 90 }
        }),
    );

    let institution = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "institutions.create",
        json!({ "name": "Default Duration School" }),
    );
    let instructor = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "instructors.create",
        json!({ "name": "Casey Wren" }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "name": "Drawing" }),
    );
    let instance = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "instances.create",
        json!({
            "courseId": course["courseId"],
            "institutionId": institution["institutionId"],
            "instructorId": instructor["instructorId"],
            "startDate": "2024-01-01"
        }),
    );

    // No explicit duration: the setup default fills in, and the slot
    // end derives from it.
    let upserted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.upsertPattern",
        json!({
            "courseInstanceId": instance["courseInstanceId"],
            "pattern": {
                "daysOfWeek": [5],
                "timeSlots": { "5": { "start": "13:00" } }
            }
        }),
    );
    assert_eq!(upserted["pattern"]["lessonDurationMinutes"], json!(90));
    assert_eq!(upserted["pattern"]["timeSlots"]["5"]["end"], json!("14:30"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
