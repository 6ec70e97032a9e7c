//! Department registry - the functional domains requests are routed to

use serde::{Deserialize, Serialize};

use super::{AgentLevel, AgentRef};

/// A functional business domain owning a pool of agents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Lowercase keywords; occurrences in the request text score the department
    pub keywords: Vec<String>,
    pub lead_agent: AgentRef,
}

impl Department {
    pub fn new(
        id: &str,
        name: &str,
        description: &str,
        keywords: &[&str],
        lead_agent: AgentRef,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            lead_agent,
        }
    }

    /// Count keyword occurrences in already-lowercased text
    pub fn score(&self, text_lower: &str) -> (usize, Vec<String>) {
        let mut total = 0;
        let mut matched = Vec::new();
        for keyword in &self.keywords {
            let count = text_lower.matches(keyword.as_str()).count();
            if count > 0 {
                total += count;
                matched.push(keyword.clone());
            }
        }
        (total, matched)
    }
}

/// Ordered set of known departments.
///
/// Order matters: on equal keyword scores the earlier department wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentRegistry {
    departments: Vec<Department>,
}

impl DepartmentRegistry {
    pub fn new(departments: Vec<Department>) -> Self {
        Self { departments }
    }

    pub fn get(&self, id: &str) -> Option<&Department> {
        self.departments.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Department> {
        self.departments.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.departments.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.departments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }

    /// Add or replace a department
    pub fn register(&mut self, department: Department) {
        if let Some(existing) = self.departments.iter_mut().find(|d| d.id == department.id) {
            *existing = department;
        } else {
            self.departments.push(department);
        }
    }
}

fn lead(id: &str, name: &str) -> AgentRef {
    AgentRef {
        id: id.to_string(),
        name: name.to_string(),
        level: AgentLevel::Director,
    }
}

impl Default for DepartmentRegistry {
    fn default() -> Self {
        Self::new(vec![
            Department::new(
                "construction",
                "Construction",
                "Renovation, building works, site planning, quantity surveying and estimates",
                &[
                    "construction",
                    "chantier",
                    "rénovation",
                    "renovation",
                    "travaux",
                    "cuisine",
                    "kitchen",
                    "salle de bain",
                    "bathroom",
                    "devis",
                    "plan",
                    "métré",
                    "plomberie",
                    "plumbing",
                    "électricité",
                    "maçonnerie",
                    "masonry",
                    "toiture",
                    "roofing",
                    "carrelage",
                    "matériaux",
                    "building",
                    "permis de construire",
                ],
                lead("construction-director", "Construction Director"),
            ),
            Department::new(
                "finance",
                "Finance",
                "Accounting, invoicing, budgets, cash flow, tax and financial reporting",
                &[
                    "comptabilité",
                    "comptable",
                    "accounting",
                    "facture",
                    "invoice",
                    "budget",
                    "trésorerie",
                    "cash flow",
                    "bilan",
                    "balance sheet",
                    "tva",
                    "dépense",
                    "expense",
                    "profit",
                    "revenue",
                    "chiffre d'affaires",
                    "financial",
                    "financier",
                    "impôt",
                ],
                lead("finance-director", "Chief Financial Officer"),
            ),
            Department::new(
                "sales",
                "Sales",
                "CRM, prospects, pipeline, deals and customer accounts",
                &[
                    "vente",
                    "sales",
                    "crm",
                    "prospect",
                    "lead",
                    "client",
                    "customer",
                    "pipeline",
                    "deal",
                    "opportunité",
                    "opportunity",
                    "closing",
                ],
                lead("sales-director", "Sales Director"),
            ),
            Department::new(
                "marketing",
                "Marketing",
                "Campaigns, brand, content, social media, SEO and advertising",
                &[
                    "marketing",
                    "campagne",
                    "campaign",
                    "seo",
                    "réseaux sociaux",
                    "social media",
                    "newsletter",
                    "brand",
                    "marque",
                    "publicité",
                    "advertising",
                    "audience",
                    "emailing",
                ],
                lead("marketing-director", "Chief Marketing Officer"),
            ),
            Department::new(
                "hr",
                "Human Resources",
                "Recruitment, onboarding, training, payroll and employee relations",
                &[
                    "recrutement",
                    "recruitment",
                    "recruit",
                    "hiring",
                    "embauche",
                    "candidat",
                    "candidate",
                    "salarié",
                    "employee",
                    "onboarding",
                    "formation",
                    "training",
                    "congé",
                    "paie",
                    "payroll",
                    "salaire",
                    "salary",
                    "human resources",
                    "ressources humaines",
                ],
                lead("hr-director", "HR Director"),
            ),
            Department::new(
                "ecommerce",
                "E-commerce",
                "Online store, product catalogue, orders, inventory and checkout",
                &[
                    "e-commerce",
                    "ecommerce",
                    "boutique en ligne",
                    "online store",
                    "shopify",
                    "produit",
                    "product",
                    "catalogue",
                    "catalog",
                    "commande",
                    "inventory",
                    "stock",
                    "panier",
                    "checkout",
                ],
                lead("ecommerce-director", "E-commerce Director"),
            ),
            Department::new(
                "legal",
                "Legal",
                "Contracts, compliance, GDPR, disputes and legal review",
                &[
                    "contrat",
                    "contract",
                    "juridique",
                    "legal",
                    "clause",
                    "conformité",
                    "compliance",
                    "rgpd",
                    "gdpr",
                    "litige",
                    "avocat",
                    "lawyer",
                ],
                lead("legal-director", "General Counsel"),
            ),
            Department::new(
                "operations",
                "Operations",
                "Logistics, suppliers, processes, scheduling and delivery",
                &[
                    "logistique",
                    "logistics",
                    "fournisseur",
                    "supplier",
                    "processus",
                    "process",
                    "operations",
                    "opérations",
                    "livraison",
                    "delivery",
                    "supply chain",
                ],
                lead("operations-director", "Chief Operating Officer"),
            ),
            Department::new(
                "support",
                "Customer Support",
                "Tickets, complaints, incidents and customer assistance",
                &[
                    "support",
                    "ticket",
                    "réclamation",
                    "complaint",
                    "incident",
                    "assistance",
                    "help desk",
                    "problème",
                ],
                lead("support-director", "Support Director"),
            ),
            Department::new(
                "general",
                "General",
                "General requests that do not belong to a specific department",
                &[],
                AgentRef {
                    id: "general-assistant".to_string(),
                    name: "General Assistant".to_string(),
                    level: AgentLevel::Manager,
                },
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_general() {
        let registry = DepartmentRegistry::default();
        assert!(registry.contains("general"));
        assert!(registry.contains("construction"));
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_score_counts_occurrences() {
        let registry = DepartmentRegistry::default();
        let construction = registry.get("construction").unwrap();
        let (score, matched) = construction.score("devis cuisine et devis salle de bain");
        assert_eq!(score, 4);
        assert!(matched.contains(&"devis".to_string()));
        assert!(matched.contains(&"salle de bain".to_string()));
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = DepartmentRegistry::default();
        let count = registry.len();
        registry.register(Department::new(
            "legal",
            "Legal & Compliance",
            "Contracts",
            &["contract"],
            lead("legal-lead", "Counsel"),
        ));
        assert_eq!(registry.len(), count);
        assert_eq!(registry.get("legal").unwrap().name, "Legal & Compliance");
    }
}
