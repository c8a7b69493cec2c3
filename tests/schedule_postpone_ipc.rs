
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

/// Workspace with a Mon/Wed instance, three scheduled lessons on
/// 2024-01-01, 2024-01-03 and 2024-01-08.
fn scheduled_fixture(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "p1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let institution = request_ok(
        stdin,
        reader,
        "p2",
        "institutions.create",
        json!({ "name": "Hillside School" }),
    );
    let instructor = request_ok(
        stdin,
        reader,
        "p3",
        "instructors.create",
        json!({ "name": "Sam Okafor" }),
    );
    let course = request_ok(
        stdin,
        reader,
        "p4",
        "courses.create",
        json!({ "name": "Creative Writing" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId");
    let instance = request_ok(
        stdin,
        reader,
        "p5",
        "instances.create",
        json!({
            "courseId": course_id,
            "institutionId": institution["institutionId"],
            "instructorId": instructor["instructorId"],
            "startDate": "2024-01-01",
            "endDate": "2024-03-31"
        }),
    );
    let instance_id = instance["courseInstanceId"]
        .as_str()
        .expect("courseInstanceId")
        .to_string();
    for i in 0..3 {
        let _ = request_ok(
            stdin,
            reader,
            &format!("p6-{}", i),
            "lessons.create",
            json!({
                "courseId": course_id,
                "title": format!("Lesson {}", i + 1),
                "sortOrder": i
            }),
        );
    }
    let _ = request_ok(
        stdin,
        reader,
        "p7",
        "schedule.upsertPattern",
        json!({
            "courseInstanceId": instance_id,
            "pattern": {
                "daysOfWeek": [1, 3],
                "timeSlots": {
                    "1": { "start": "08:00", "end": "08:45" },
                    "3": { "start": "08:00", "end": "08:45" }
                },
                "lessonDurationMinutes": 45
            }
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "p8",
        "schedule.apply",
        json!({ "courseInstanceId": instance_id }),
    );
    instance_id
}

fn list_starts(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    instance_id: &str,
) -> Vec<String> {
    let listed = request_ok(
        stdin,
        reader,
        id,
        "schedule.list",
        json!({ "courseInstanceId": instance_id }),
    );
    listed["occurrences"]
        .as_array()
        .expect("occurrences")
        .iter()
        .map(|o| o["scheduledStart"].as_str().expect("scheduledStart").to_string())
        .collect()
}

#[test]
fn postpone_cascades_through_later_occurrences() {
    let workspace = temp_dir("coursedesk-postpone");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let instance_id = scheduled_fixture(&mut stdin, &mut reader, &workspace);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.list",
        json!({ "courseInstanceId": instance_id }),
    );
    let first_id = listed["occurrences"][0]["id"].as_str().expect("id").to_string();

    let postponed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.postpone",
        json!({ "physicalScheduleId": first_id }),
    );
    assert_eq!(postponed["newStart"], json!("2024-01-03T08:00"));
    assert_eq!(postponed["updatedCount"], json!(3));

    let starts = list_starts(&mut stdin, &mut reader, "3", &instance_id);
    assert_eq!(
        starts,
        vec!["2024-01-03T08:00", "2024-01-08T08:00", "2024-01-10T08:00"]
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn postpone_skips_blocked_days() {
    let workspace = temp_dir("coursedesk-postpone-blocked");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let instance_id = scheduled_fixture(&mut stdin, &mut reader, &workspace);

    // The natural next slot (Wednesday Jan 3) is blocked.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "blockedDates.create",
        json!({ "label": "Staff day", "startDate": "2024-01-03" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.list",
        json!({ "courseInstanceId": instance_id }),
    );
    let first_id = listed["occurrences"][0]["id"].as_str().expect("id").to_string();

    let postponed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.postpone",
        json!({ "physicalScheduleId": first_id }),
    );
    assert_eq!(postponed["newStart"], json!("2024-01-08T08:00"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn exhausted_search_fails_without_mutating() {
    let workspace = temp_dir("coursedesk-postpone-exhausted");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let instance_id = scheduled_fixture(&mut stdin, &mut reader, &workspace);

    // Block far past the bounded search window.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "blockedDates.create",
        json!({
            "label": "Renovation",
            "startDate": "2024-01-02",
            "endDate": "2024-06-30"
        }),
    );

    let before = list_starts(&mut stdin, &mut reader, "2", &instance_id);
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.list",
        json!({ "courseInstanceId": instance_id }),
    );
    let first_id = listed["occurrences"][0]["id"].as_str().expect("id").to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.postpone",
        json!({ "physicalScheduleId": first_id }),
    );
    assert_eq!(code, "search_exhausted");

    let after = list_starts(&mut stdin, &mut reader, "5", &instance_id);
    assert_eq!(before, after, "failed postpone must not move anything");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn postponing_a_middle_occurrence_leaves_earlier_ones_alone() {
    let workspace = temp_dir("coursedesk-postpone-middle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let instance_id = scheduled_fixture(&mut stdin, &mut reader, &workspace);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.list",
        json!({ "courseInstanceId": instance_id }),
    );
    let second_id = listed["occurrences"][1]["id"].as_str().expect("id").to_string();

    let postponed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.postpone",
        json!({ "physicalScheduleId": second_id }),
    );
    assert_eq!(postponed["newStart"], json!("2024-01-08T08:00"));
    assert_eq!(postponed["updatedCount"], json!(2));

    let starts = list_starts(&mut stdin, &mut reader, "3", &instance_id);
    assert_eq!(
        starts,
        vec!["2024-01-01T08:00", "2024-01-08T08:00", "2024-01-10T08:00"]
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
