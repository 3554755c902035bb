use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Semester keys used throughout the app. One academic year has four terms.
pub const SEMESTER_KEYS: [&str; 4] = ["1", "2", "3", "4"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeComponent {
    pub name: String,
    pub weight: f64,
}

impl GradeComponent {
    pub fn new(name: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
        }
    }
}

/// Per-class grading scheme: four scoring components plus the display-only
/// "total" row. The four scoring weights are point allocations out of 100;
/// `grades.componentsUpdate` is the only place that enforces the sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeComponentsSettings {
    pub attendance: GradeComponent,
    pub activity: GradeComponent,
    pub midterm: GradeComponent,
    #[serde(rename = "final")]
    pub final_exam: GradeComponent,
    pub total: GradeComponent,
}

impl GradeComponentsSettings {
    pub fn defaults() -> Self {
        Self {
            attendance: GradeComponent::new("Attendance", 10.0),
            activity: GradeComponent::new("Activity", 10.0),
            midterm: GradeComponent::new("Midterm", 30.0),
            final_exam: GradeComponent::new("Final", 50.0),
            total: GradeComponent::new("Total", 100.0),
        }
    }

    /// Sum of the four scoring weights ("total" is display-only and excluded).
    pub fn scoring_weight_sum(&self) -> f64 {
        self.attendance.weight + self.activity.weight + self.midterm.weight + self.final_exam.weight
    }
}

/// Raw points earned in one semester. Absent fields mean "not recorded yet"
/// and count as zero everywhere downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterGrades {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midterm: Option<f64>,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub final_exam: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub grades: BTreeMap<String, SemesterGrades>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewMode {
    Semester,
    YearEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Total score for one semester: the plain sum of the four raw component
/// values. Each raw value is already "points earned out of the component's
/// weight", so no rescaling happens here; the weights bound the grade editor,
/// not the calculator. Absent components count as zero.
pub fn calculate_total_score(grades: &SemesterGrades, _settings: &GradeComponentsSettings) -> f64 {
    grades.attendance.unwrap_or(0.0)
        + grades.activity.unwrap_or(0.0)
        + grades.midterm.unwrap_or(0.0)
        + grades.final_exam.unwrap_or(0.0)
}

/// One total per recorded semester. Keys are the single digits "1".."4", so
/// sorted map order and term order coincide.
pub fn semester_scores(
    by_semester: &BTreeMap<String, SemesterGrades>,
    settings: &GradeComponentsSettings,
) -> BTreeMap<String, f64> {
    by_semester
        .iter()
        .map(|(semester, grades)| (semester.clone(), calculate_total_score(grades, settings)))
        .collect()
}

/// Arithmetic mean of the per-semester totals over however many semesters are
/// recorded. An empty map yields 0.0, never NaN.
pub fn yearly_average(
    by_semester: &BTreeMap<String, SemesterGrades>,
    settings: &GradeComponentsSettings,
) -> f64 {
    if by_semester.is_empty() {
        return 0.0;
    }
    let sum: f64 = by_semester
        .values()
        .map(|g| calculate_total_score(g, settings))
        .sum();
    sum / (by_semester.len() as f64)
}

fn score_key(
    student: &Student,
    semester: &str,
    settings: &GradeComponentsSettings,
    yearly_averages: &HashMap<String, f64>,
    view_mode: ViewMode,
) -> f64 {
    match view_mode {
        ViewMode::Semester => student
            .grades
            .get(semester)
            .map(|g| calculate_total_score(g, settings))
            .unwrap_or(0.0),
        ViewMode::YearEnd => yearly_averages.get(&student.id).copied().unwrap_or(0.0),
    }
}

/// Rank students by computed score. Semester view scores each student's given
/// term (missing term counts as 0); year-end view ranks on the supplied
/// per-student yearly averages (missing entry counts as 0). The sort is stable,
/// so tied students keep their roster order; the input slice is not touched.
pub fn sort_students_by_score(
    students: &[Student],
    semester: &str,
    settings: &GradeComponentsSettings,
    yearly_averages: &HashMap<String, f64>,
    view_mode: ViewMode,
    order: SortOrder,
) -> Vec<Student> {
    let mut out: Vec<Student> = students.to_vec();
    out.sort_by(|a, b| {
        let ka = score_key(a, semester, settings, yearly_averages, view_mode);
        let kb = score_key(b, semester, settings, yearly_averages, view_mode);
        let cmp = ka.partial_cmp(&kb).unwrap_or(Ordering::Equal);
        match order {
            SortOrder::Asc => cmp,
            SortOrder::Desc => cmp.reverse(),
        }
    });
    out
}

/// Rank students alphabetically by "last first", case-insensitively and with
/// Mongolian Cyrillic collation. Stable; the input slice is not touched.
pub fn sort_students_by_name(students: &[Student], order: SortOrder) -> Vec<Student> {
    let mut out: Vec<Student> = students.to_vec();
    out.sort_by(|a, b| {
        let ka = name_collation_key(&format!("{} {}", a.last_name, a.first_name));
        let kb = name_collation_key(&format!("{} {}", b.last_name, b.first_name));
        let cmp = ka.cmp(&kb);
        match order {
            SortOrder::Asc => cmp,
            SortOrder::Desc => cmp.reverse(),
        }
    });
    out
}

/// Mongolian Cyrillic alphabet. Codepoint order gets ё, ө and ү wrong (ё sits
/// past е's neighbors, ө/ү live outside the base Cyrillic run), so letters are
/// ranked against this table instead.
const MONGOLIAN_CYRILLIC: [char; 35] = [
    'а', 'б', 'в', 'г', 'д', 'е', 'ё', 'ж', 'з', 'и', 'й', 'к', 'л', 'м', 'н', 'о', 'ө', 'п', 'р',
    'с', 'т', 'у', 'ү', 'ф', 'х', 'ц', 'ч', 'ш', 'щ', 'ъ', 'ы', 'ь', 'э', 'ю', 'я',
];

/// Per-character sort key: table letters are re-ranked from the base of the
/// Cyrillic lowercase block so they still collate as one script; everything
/// else falls back to its lowercased codepoint, which is fine for Latin.
fn name_collation_key(name: &str) -> Vec<u32> {
    name.chars()
        .flat_map(char::to_lowercase)
        .map(
            |c| match MONGOLIAN_CYRILLIC.iter().position(|&m| m == c) {
                Some(rank) => 'а' as u32 + rank as u32,
                None => c as u32,
            },
        )
        .collect()
}
