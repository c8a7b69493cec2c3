
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_ok, spawn_sidecar, temp_dir};

struct Fixture {
    course_id: String,
    instance_id: String,
    template_lesson_ids: Vec<String>,
}

fn applied_fixture(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "m1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let institution = request_ok(
        stdin,
        reader,
        "m2",
        "institutions.create",
        json!({ "name": "Lakeside Institute" }),
    );
    let instructor = request_ok(
        stdin,
        reader,
        "m3",
        "instructors.create",
        json!({ "name": "Priya Natarajan" }),
    );
    let course = request_ok(
        stdin,
        reader,
        "m4",
        "courses.create",
        json!({ "name": "World History" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();
    let instance = request_ok(
        stdin,
        reader,
        "m5",
        "instances.create",
        json!({
            "courseId": course_id,
            "institutionId": institution["institutionId"],
            "instructorId": instructor["instructorId"],
            "startDate": "2024-01-01",
            "endDate": "2024-06-30"
        }),
    );
    let instance_id = instance["courseInstanceId"]
        .as_str()
        .expect("courseInstanceId")
        .to_string();

    let template_lesson_ids = (0..3)
        .map(|i| {
            let created = request_ok(
                stdin,
                reader,
                &format!("m6-{}", i),
                "lessons.create",
                json!({
                    "courseId": course_id,
                    "title": format!("Template {}", i + 1),
                    "sortOrder": i
                }),
            );
            created["lessonId"].as_str().expect("lessonId").to_string()
        })
        .collect();

    let _ = request_ok(
        stdin,
        reader,
        "m7",
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
        "m8",
        "schedule.apply",
        json!({ "courseInstanceId": instance_id }),
    );
    Fixture {
        course_id,
        instance_id,
        template_lesson_ids,
    }
}

#[test]
fn switching_to_custom_only_replaces_template_occurrences() {
    let workspace = temp_dir("coursedesk-mode-switch");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = applied_fixture(&mut stdin, &mut reader, &workspace);

    for i in 0..2 {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("1-{}", i),
            "lessons.create",
            json!({
                "courseId": fx.course_id,
                "courseInstanceId": fx.instance_id,
                "title": format!("Custom {}", i + 1),
                "sortOrder": i
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "instances.setLessonMode",
        json!({ "courseInstanceId": fx.instance_id, "lessonMode": "custom_only" }),
    );
    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.apply",
        json!({ "courseInstanceId": fx.instance_id }),
    );
    assert_eq!(applied["deleted"], json!(3));
    assert_eq!(applied["created"], json!(2));
    assert_eq!(applied["updated"], json!(0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.list",
        json!({ "courseInstanceId": fx.instance_id }),
    );
    let occurrences = listed["occurrences"].as_array().expect("occurrences");
    assert_eq!(occurrences.len(), 2);
    for occ in occurrences {
        let title = occ["lessonTitle"].as_str().expect("lessonTitle");
        assert!(title.starts_with("Custom"), "unexpected lesson: {}", title);
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn combined_mode_schedules_template_before_instance_lessons() {
    let workspace = temp_dir("coursedesk-mode-combined");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = applied_fixture(&mut stdin, &mut reader, &workspace);

    let custom = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "lessons.create",
        json!({
            "courseId": fx.course_id,
            "courseInstanceId": fx.instance_id,
            "title": "Custom Finale",
            "sortOrder": 0
        }),
    );
    let custom_id = custom["lessonId"].as_str().expect("lessonId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "instances.setLessonMode",
        json!({ "courseInstanceId": fx.instance_id, "lessonMode": "combined" }),
    );

    // The instance block is renumbered to follow the template block.
    let instance_lessons = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "lessons.list",
        json!({ "courseId": fx.course_id, "courseInstanceId": fx.instance_id }),
    );
    assert_eq!(instance_lessons["lessons"][0]["id"], json!(custom_id));
    assert_eq!(instance_lessons["lessons"][0]["sortOrder"], json!(3));

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.apply",
        json!({ "courseInstanceId": fx.instance_id }),
    );
    // The three template occurrences survive in place; the custom
    // lesson lands after them.
    assert_eq!(applied["updated"], json!(3));
    assert_eq!(applied["created"], json!(1));
    assert_eq!(applied["deleted"], json!(0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.list",
        json!({ "courseInstanceId": fx.instance_id }),
    );
    let occurrences = listed["occurrences"].as_array().expect("occurrences");
    assert_eq!(occurrences.len(), 4);
    assert_eq!(occurrences[3]["lessonTitle"], json!("Custom Finale"));
    assert_eq!(occurrences[3]["lessonNumber"], json!(4));
    assert_eq!(occurrences[3]["scheduledStart"], json!("2024-01-10T08:00"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn task_records_are_cleaned_up_with_their_occurrences() {
    let workspace = temp_dir("coursedesk-mode-tasks");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = applied_fixture(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "tasks.create",
        json!({
            "courseInstanceId": fx.instance_id,
            "lessonId": fx.template_lesson_ids[0],
            "title": "Collect worksheets"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "lessons.create",
        json!({
            "courseId": fx.course_id,
            "courseInstanceId": fx.instance_id,
            "title": "Custom 1",
            "sortOrder": 0
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "instances.setLessonMode",
        json!({ "courseInstanceId": fx.instance_id, "lessonMode": "custom_only" }),
    );
    // The template occurrences carry a dependent task record; cleanup
    // must remove it before the occurrence rows, or this apply fails.
    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.apply",
        json!({ "courseInstanceId": fx.instance_id }),
    );
    assert_eq!(applied["deleted"], json!(3));

    let tasks = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "tasks.list",
        json!({ "courseInstanceId": fx.instance_id }),
    );
    assert_eq!(tasks["tasks"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
