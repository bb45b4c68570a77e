use dr_types::Detection;

/// Summarizes detections as a sentence, with a suggested mode when the scene
/// contains something worth following.
pub fn describe(detections: &[Detection]) -> String {
    if detections.is_empty() {
        return "No objects detected in the scene.".to_owned();
    }

    // counts in order of first appearance
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for detection in detections {
        match counts.iter_mut().find(|(class, _)| *class == detection.class) {
            Some((_, count)) => *count += 1,
            None => counts.push((detection.class.as_str(), 1)),
        }
    }

    let listed = counts
        .iter()
        .map(|(class, count)| {
            if *count > 1 {
                format!("{count} {class}s")
            } else {
                format!("{count} {class}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let has = |name: &str| counts.iter().any(|(class, _)| *class == name);

    let mut description = format!("Detected objects: {listed}");
    if has("person") {
        description.push_str(". Recommendation: person-following mode.");
    } else if has("car") || has("bicycle") {
        description.push_str(". Recommendation: vehicle-following mode.");
    }

    description
}
