use serde::{Deserialize, Serialize};

/// Facts the assistant is allowed to talk about
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaProfile {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub education: Option<String>,
    #[serde(default)]
    pub mission: Option<String>,
    #[serde(default)]
    pub programming: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub spoken_languages: Vec<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub links: Vec<ProfileLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileLink {
    pub label: String,
    pub url: String,
}

impl Default for PersonaProfile {
    fn default() -> Self {
        Self {
            name: "Yijun Xiang".to_string(),
            title: Some("AI Developer & Researcher".to_string()),
            location: Some("San Francisco Bay Area".to_string()),
            education: Some(
                "B.A. in Computer Science & Applied Mathematics from the University of California, Berkeley."
                    .to_string(),
            ),
            mission: Some(
                "To build intelligent systems that solve human-centric problems, with a focus on education and technological innovation."
                    .to_string(),
            ),
            programming: ["Python", "JavaScript", "TypeScript", "Java"]
                .map(String::from)
                .to_vec(),
            technologies: ["React", "Next.js", "Node.js", "TensorFlow", "PyTorch", "Docker"]
                .map(String::from)
                .to_vec(),
            spoken_languages: [
                "English",
                "Chinese (Mandarin)",
                "Japanese",
                "French",
                "Korean",
                "Cantonese",
            ]
            .map(String::from)
            .to_vec(),
            contact: Some("yijun.x@berkeley.edu".to_string()),
            links: vec![
                ProfileLink {
                    label: "GitHub".to_string(),
                    url: "https://github.com/yijun-xiang".to_string(),
                },
                ProfileLink {
                    label: "LinkedIn".to_string(),
                    url: "https://linkedin.com/in/yijun-x-7287a1228".to_string(),
                },
            ],
        }
    }
}

/// System prompt for the assistant persona, injected into the chat service
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    system_prompt: String,
}

impl Persona {
    /// Use `prompt` verbatim as the system message.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self { system_prompt: prompt.into() }
    }

    pub fn from_profile(profile: &PersonaProfile) -> Self {
        Self { system_prompt: render(profile) }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::from_profile(&PersonaProfile::default())
    }
}

fn render(profile: &PersonaProfile) -> String {
    let name = &profile.name;
    let mut lines = vec![
        format!("You are {name}'s personal AI assistant for their portfolio website."),
        format!("Your goal is to answer questions about {name} based on the information provided below."),
        "Be friendly, professional, and concise.".to_string(),
        format!(
            "If a question is not about {name} or their professional background, politely state that you can only answer questions related to {name} and then try to answer the question as a general helpful assistant."
        ),
        String::new(),
        format!("Here is {name}'s information:"),
        format!("- Name: {name}"),
    ];

    let optional = [
        ("Title", &profile.title),
        ("Current Location", &profile.location),
        ("Education", &profile.education),
        ("Mission", &profile.mission),
    ];
    lines.extend(
        optional
            .into_iter()
            .filter_map(|(label, value)| value.as_ref().map(|value| format!("- {label}: {value}"))),
    );

    let skills: Vec<String> = [
        ("Programming", &profile.programming),
        ("Technologies", &profile.technologies),
        ("Spoken Languages", &profile.spoken_languages),
    ]
    .into_iter()
    .filter(|(_, items)| !items.is_empty())
    .map(|(label, items)| format!("  - {label}: {}", items.join(", ")))
    .collect();
    if !skills.is_empty() {
        lines.push("- Skills & Languages:".to_string());
        lines.extend(skills);
    }

    if let Some(contact) = &profile.contact {
        lines.push(format!("- Contact: {contact}"));
    }
    lines.extend(profile.links.iter().map(|link| format!("- {}: {}", link.label, link.url)));

    let mut prompt = lines.join("\n");
    prompt.push('\n');
    prompt
}
