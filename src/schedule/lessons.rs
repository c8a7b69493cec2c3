/// Which lesson collection(s) feed the generator for a course instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonMode {
    Template,
    CustomOnly,
    Combined,
}

impl LessonMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LessonMode::Template => "template",
            LessonMode::CustomOnly => "custom_only",
            LessonMode::Combined => "combined",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "template" => Some(LessonMode::Template),
            "custom_only" => Some(LessonMode::CustomOnly),
            "combined" => Some(LessonMode::Combined),
            _ => None,
        }
    }
}

/// A lesson as the scheduler sees it. `course_instance_id` None marks a
/// template lesson shared across instances of the course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonRef {
    pub id: String,
    pub title: String,
    pub order_index: i64,
    pub course_instance_id: Option<String>,
}

fn sort_lessons(lessons: &mut [LessonRef]) {
    lessons.sort_by(|a, b| {
        a.order_index
            .cmp(&b.order_index)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Produces the ordered lesson list for one generation run. In combined
/// mode every template lesson precedes every instance lesson.
pub fn resolve_lesson_source(
    mode: LessonMode,
    template_lessons: Vec<LessonRef>,
    instance_lessons: Vec<LessonRef>,
) -> Vec<LessonRef> {
    match mode {
        LessonMode::Template => {
            let mut out = template_lessons;
            sort_lessons(&mut out);
            out
        }
        LessonMode::CustomOnly => {
            let mut out = instance_lessons;
            sort_lessons(&mut out);
            out
        }
        LessonMode::Combined => {
            let mut head = template_lessons;
            sort_lessons(&mut head);
            let mut tail = instance_lessons;
            sort_lessons(&mut tail);
            head.extend(tail);
            head
        }
    }
}

/// Storage order indexes for instance lessons under combined mode:
/// renumbered to follow the template block. Returns (lesson id, new
/// order index) pairs in the order they should be persisted.
pub fn combined_storage_orders(
    template_len: usize,
    instance_lessons: &[LessonRef],
) -> Vec<(String, i64)> {
    let mut sorted: Vec<&LessonRef> = instance_lessons.iter().collect();
    sorted.sort_by(|a, b| {
        a.order_index
            .cmp(&b.order_index)
            .then_with(|| a.id.cmp(&b.id))
    });
    sorted
        .iter()
        .enumerate()
        .map(|(i, l)| (l.id.clone(), (template_len + i) as i64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(id: &str, order: i64, instance: Option<&str>) -> LessonRef {
        LessonRef {
            id: id.to_string(),
            title: format!("Lesson {}", id),
            order_index: order,
            course_instance_id: instance.map(|s| s.to_string()),
        }
    }

    #[test]
    fn mode_strings_round_trip() {
        for mode in [LessonMode::Template, LessonMode::CustomOnly, LessonMode::Combined] {
            assert_eq!(LessonMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(LessonMode::parse("weekly"), None);
    }

    #[test]
    fn template_mode_sorts_by_order_then_id() {
        let out = resolve_lesson_source(
            LessonMode::Template,
            vec![
                lesson("b", 2, None),
                lesson("c", 1, None),
                lesson("a", 2, None),
            ],
            vec![lesson("x", 0, Some("inst"))],
        );
        let ids: Vec<&str> = out.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn custom_only_ignores_template() {
        let out = resolve_lesson_source(
            LessonMode::CustomOnly,
            vec![lesson("t", 0, None)],
            vec![lesson("y", 1, Some("inst")), lesson("x", 0, Some("inst"))],
        );
        let ids: Vec<&str> = out.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn combined_puts_all_template_lessons_first() {
        let out = resolve_lesson_source(
            LessonMode::Combined,
            vec![lesson("t2", 1, None), lesson("t1", 0, None)],
            vec![lesson("i1", 0, Some("inst"))],
        );
        let ids: Vec<&str> = out.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "i1"]);
    }

    #[test]
    fn empty_source_is_valid() {
        let out = resolve_lesson_source(LessonMode::CustomOnly, vec![lesson("t", 0, None)], vec![]);
        assert!(out.is_empty());
    }

    #[test]
    fn combined_storage_orders_start_after_template_block() {
        let instance = vec![
            lesson("i2", 5, Some("inst")),
            lesson("i1", 3, Some("inst")),
        ];
        let orders = combined_storage_orders(4, &instance);
        assert_eq!(
            orders,
            vec![("i1".to_string(), 4), ("i2".to_string(), 5)]
        );
    }
}
